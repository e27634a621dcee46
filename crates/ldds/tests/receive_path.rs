// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! End-to-end receive path: socket wait-set -> receive buffer pool ->
//! defragment/reorder -> delivery queue.
//!
//! A UDP sender shoots datagrams carrying (seq, payload); the receive
//! loop copies each packet into pool storage, wraps it in an rdata, and
//! hands it to a proxy writer. The delivery thread observes every sample
//! exactly once, in order, and all storage settles back to the pool.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ldds::core::guid::Guid;
use ldds::core::rt::{Dqueue, SockWaitset};
use ldds::core::time::WallTime;
use ldds::discovery::ProxyWriter;
use ldds::rx::{RBufPool, RData, SampleInfo, StatusInfo};

fn sample_info(seq: u64, size: u32) -> SampleInfo {
    SampleInfo {
        writer: Guid::UNKNOWN,
        seq,
        size,
        fragsize: size,
        source_timestamp: WallTime(0),
        statusinfo: StatusInfo::default(),
        keyhash: None,
    }
}

#[test]
fn datagrams_flow_to_the_delivery_thread_in_order() {
    let mut ws = SockWaitset::new().unwrap();
    let handle = ws.handle();

    let rx = mio::net::UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = rx.local_addr().unwrap();
    let conn = handle.add(Box::new(rx)).unwrap();

    let pool = RBufPool::new(256 * 1024, 2048).unwrap();
    pool.set_owner();
    let mut proxy = ProxyWriter::new(Guid::UNKNOWN, true, 16, 64);

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    let dq = Dqueue::new(
        "rxpath",
        1000,
        Box::new(move |info, frags, _rdguid| {
            let payload = ldds::rx::reassemble_payload(info, frags);
            sink.lock().unwrap().push((info.seq, payload));
        }),
    )
    .unwrap();

    // out-of-order sender: 2, 1, 4, 3
    let tx = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let sender = std::thread::spawn(move || {
        for seq in [2u64, 1, 4, 3] {
            let mut pkt = seq.to_be_bytes().to_vec();
            pkt.extend_from_slice(format!("payload-{seq}").as_bytes());
            tx.send_to(&pkt, addr).unwrap();
            std::thread::sleep(Duration::from_millis(10));
        }
    });

    let mut received = 0;
    let deadline = Instant::now() + Duration::from_secs(5);
    while received < 4 && Instant::now() < deadline {
        let Some(mut events) = ws.wait(Some(Duration::from_millis(100))).unwrap() else {
            continue;
        };
        while let Some(idx) = events.next_event() {
            assert_eq!(idx, conn);
            loop {
                let mut buf = [0u8; 1500];
                let n = match handle.with_connection(idx, |c| {
                    let sock = c
                        .as_any_mut()
                        .downcast_mut::<mio::net::UdpSocket>()
                        .expect("udp connection");
                    sock.recv_from(&mut buf).map(|(n, _)| n)
                }) {
                    Some(Ok(n)) => n,
                    _ => break,
                };
                if n < 8 {
                    continue;
                }
                // packet -> pool storage -> rdata -> proxy writer
                let rmsg = pool.rmsg_new();
                let off = rmsg.append(&buf[..n]).unwrap();
                let seq = u64::from_be_bytes(buf[..8].try_into().unwrap());
                let payload_len = (n - 8) as u32;
                let rdata = RData::new(&rmsg, 0, payload_len, off, off + 8);
                let info = sample_info(seq, payload_len);
                proxy.handle_data(rdata, &info, &dq);
                rmsg.commit();
                received += 1;
            }
        }
    }
    sender.join().unwrap();
    assert_eq!(received, 4, "all datagrams picked up from the socket");

    drop(dq); // drain the delivery queue

    let seen = delivered.lock().unwrap();
    let seqs: Vec<u64> = seen.iter().map(|(s, _)| *s).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4], "reorder restored publication order");
    for (seq, payload) in seen.iter() {
        assert_eq!(payload, format!("payload-{seq}").as_bytes());
    }
}

#[test]
fn trigger_interrupts_a_blocked_receive_loop() {
    let mut ws = SockWaitset::new().unwrap();
    let handle = ws.handle();
    let t = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        handle.trigger();
    });
    let start = Instant::now();
    loop {
        match ws.wait(Some(Duration::from_secs(5))).unwrap() {
            Some(ev) if ev.triggered() => break,
            Some(_) => continue,
            None => panic!("trigger never arrived"),
        }
    }
    assert!(start.elapsed() < Duration::from_secs(2));
    t.join().unwrap();
}
