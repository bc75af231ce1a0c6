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

//! Publisher to spool file round trip through the proxy stage

use std::thread;
use std::time::{Duration, Instant};

use sigfinder::live::LiveFile;
use sigfinder::spool::{buff_file, read_spool};
use sigfinder::stages::proxy::{run_proxy_stage, ProxySetup};

#[test]
fn test_proxy_spools_published_packets() {
    let context = zmq::Context::new();
    let publisher = context.socket(zmq::PUB).unwrap();
    publisher.bind("tcp://127.0.0.1:*").unwrap();
    let endpoint = publisher.get_last_endpoint().unwrap().unwrap();
    let logport: u16 = endpoint.rsplit(':').next().unwrap().parse().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let live = LiveFile::create(&dir.path().join("live_file")).unwrap();
    let setup = ProxySetup {
        context: context.clone(),
        logaddr: "127.0.0.1".to_string(),
        logport,
        buff_path: dir.path().to_path_buf(),
        buffer_time: Duration::from_millis(200),
        poll_timeout: Duration::from_millis(10),
        live: live.clone(),
    };
    let proxy = thread::spawn(move || run_proxy_stage(setup));

    // Keep publishing until the proxy publishes a buffer; subscribers join
    // slowly, so early messages may be missed
    let visible = buff_file(dir.path());
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut sent = 0u32;
    while !visible.exists() {
        assert!(Instant::now() < deadline, "proxy never published a buffer");
        publisher
            .send(format!("{{\"packet\": {}}}\n", sent).as_bytes(), 0)
            .unwrap();
        sent += 1;
        thread::sleep(Duration::from_millis(20));
    }

    let text = read_spool(&visible).unwrap();
    assert!(text.contains("{\"packet\": "));
    // Packets arrive whole and in order
    let first: u32 = text
        .lines()
        .next()
        .and_then(|line| line.trim_start_matches("{\"packet\": ").strip_suffix('}'))
        .and_then(|n| n.parse().ok())
        .expect("first line is a whole packet");
    let numbers: Vec<u32> = text
        .lines()
        .filter_map(|line| {
            line.trim_start_matches("{\"packet\": ")
                .strip_suffix('}')
                .and_then(|n| n.parse().ok())
        })
        .collect();
    assert!(!numbers.is_empty());
    assert!(numbers.windows(2).all(|w| w[1] == w[0] + 1));
    assert_eq!(numbers[0], first);

    live.remove().unwrap();
    let report = proxy.join().unwrap().unwrap();
    assert!(report.packets > 0);
    assert!(report.buffers > 0);
}
