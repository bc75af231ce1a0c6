/*
 * Copyright 2022 The Regents of the University of California
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

//! The long-lived pipeline stages
//!
//! The proxy stage subscribes to the scanner's publisher and spools packets
//! to disk; the process stage drains the spool files, assembles frames, and
//! drives detection and dispatch. The two meet only at the spool file.

pub mod process;
pub mod proxy;
