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

//! The liveness sentinel
//!
//! A file whose existence means "keep running". Removing it tells every
//! stage to finish its current iteration and return.

use std::fs::{self, File};
use std::io::Result;
use std::path::{Path, PathBuf};

/// A handle on the liveness sentinel file
#[derive(Debug, Clone)]
pub struct LiveFile {
    path: PathBuf,
}

impl LiveFile {
    /// Creates the sentinel file
    pub fn create(path: &Path) -> Result<Self> {
        File::create(path)?;
        Ok(LiveFile {
            path: path.to_path_buf(),
        })
    }

    /// Wraps an existing sentinel path without creating it
    pub fn at(path: &Path) -> Self {
        LiveFile {
            path: path.to_path_buf(),
        }
    }

    /// True while the sentinel exists
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Removes the sentinel, signaling shutdown
    pub fn remove(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_create_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live_file");
        let live = LiveFile::create(&path).unwrap();
        assert!(live.exists());
        live.remove().unwrap();
        assert!(!live.exists());
        // A second remove is harmless
        live.remove().unwrap();
    }
}
