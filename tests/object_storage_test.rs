//! End-to-end object storage scenarios over the process-local in-memory
//! store (`mem://`), exercising the asynchronous completion path.

use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};

use quasar_streamer::backend::object_client::shared_memory_store;
use quasar_streamer::{
    Config, Credentials, DstBuffer, FileRequest, Response, ResponseCode, Streamer,
};

fn put_object(bucket: &str, key: &str, data: Vec<u8>) {
    let store = shared_memory_store(bucket);
    let payload = PutPayload::from(bytes::Bytes::from(data));
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(store.put(&ObjectPath::from(key), payload))
        .unwrap();
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(17).wrapping_add(seed)).collect()
}

fn object_config(s3_concurrency: usize, s3_block: u64) -> Config {
    Config::new(2, s3_concurrency, s3_block, 2 * 1024 * 1024, false).unwrap()
}

fn drain(streamer: &Streamer, expected: usize) -> Vec<Response> {
    let mut events = Vec::new();
    for _ in 0..expected {
        let response = streamer.response();
        assert_ne!(response.ret, ResponseCode::FinishedError);
        events.push(response);
    }
    assert_eq!(streamer.response().ret, ResponseCode::FinishedError);
    events
}

#[test]
fn test_single_object_multiple_sub_ranges() {
    let data = pattern(100_000, 5);
    put_object("e2e-single", "model/weights.bin", data.clone());

    let mut streamer = Streamer::with_config(object_config(2, 8192)).unwrap();
    let mut buffer = vec![0u8; 100_000];
    let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };

    streamer
        .request(
            &[FileRequest {
                path: "mem://e2e-single/model/weights.bin".to_string(),
                offset: 0,
                bytesize: 100_000,
                sub_sizes: vec![40_000, 40_000, 20_000],
            }],
            dst,
            Credentials::default(),
        )
        .unwrap();

    let events = drain(&streamer, 3);
    let mut seen = [false; 3];
    for event in events {
        assert_eq!(event.ret, ResponseCode::Success);
        assert_eq!(event.file_index, 0);
        assert!(!seen[event.index as usize]);
        seen[event.index as usize] = true;
    }
    assert!(seen.iter().all(|s| *s));
    assert_eq!(buffer, data);
}

#[test]
fn test_object_range_read_with_offset() {
    let data = pattern(50_000, 9);
    put_object("e2e-offset", "blob", data.clone());

    let mut streamer = Streamer::with_config(object_config(2, 4096)).unwrap();
    let mut buffer = vec![0u8; 10_000];
    let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };

    streamer
        .request(
            &[FileRequest::whole("mem://e2e-offset/blob", 30_000, 10_000)],
            dst,
            Credentials::default(),
        )
        .unwrap();

    let events = drain(&streamer, 1);
    assert_eq!(events[0].ret, ResponseCode::Success);
    assert_eq!(buffer, data[30_000..40_000]);
}

#[test]
fn test_multiple_objects_one_request() {
    let first = pattern(30_000, 21);
    let second = pattern(20_000, 23);
    put_object("e2e-multi", "a.bin", first.clone());
    put_object("e2e-multi", "b.bin", second.clone());

    let mut streamer = Streamer::with_config(object_config(3, 4096)).unwrap();
    let mut buffer = vec![0u8; 50_000];
    let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };

    streamer
        .request(
            &[
                FileRequest {
                    path: "mem://e2e-multi/a.bin".to_string(),
                    offset: 0,
                    bytesize: 30_000,
                    sub_sizes: vec![10_000, 10_000, 10_000],
                },
                FileRequest {
                    path: "mem://e2e-multi/b.bin".to_string(),
                    offset: 0,
                    bytesize: 20_000,
                    sub_sizes: vec![20_000],
                },
            ],
            dst,
            Credentials::default(),
        )
        .unwrap();

    let events = drain(&streamer, 4);
    for event in &events {
        assert_eq!(event.ret, ResponseCode::Success);
    }
    assert_eq!(&buffer[..30_000], &first[..]);
    assert_eq!(&buffer[30_000..], &second[..]);
}

#[test]
fn test_missing_object_one_event_per_sub_range() {
    let mut streamer = Streamer::with_config(object_config(2, 4096)).unwrap();
    let mut buffer = vec![0u8; 65536];
    let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };

    streamer
        .request(
            &[FileRequest {
                path: "mem://e2e-missing/not-there".to_string(),
                offset: 0,
                bytesize: 65536,
                sub_sizes: vec![32768, 32768],
            }],
            dst,
            Credentials::default(),
        )
        .unwrap();

    // exactly one event per sub-range, all failed, then FinishedError
    let events = drain(&streamer, 2);
    let mut seen = [false; 2];
    for event in events {
        assert_eq!(event.ret, ResponseCode::FileAccessError);
        assert!(!seen[event.index as usize]);
        seen[event.index as usize] = true;
    }
    assert!(seen.iter().all(|s| *s));
}

#[test]
fn test_zero_size_sub_range_on_object_path() {
    let data = pattern(8192, 27);
    put_object("e2e-zero", "blob", data.clone());

    let mut streamer = Streamer::with_config(object_config(2, 4096)).unwrap();
    let mut buffer = vec![0u8; 8192];
    let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };

    streamer
        .request(
            &[FileRequest {
                path: "mem://e2e-zero/blob".to_string(),
                offset: 0,
                bytesize: 8192,
                sub_sizes: vec![4096, 0, 4096],
            }],
            dst,
            Credentials::default(),
        )
        .unwrap();

    let events = drain(&streamer, 3);
    for event in &events {
        assert_eq!(event.ret, ResponseCode::Success);
    }
    assert_eq!(buffer, data);
}

#[test]
fn test_back_to_back_object_requests() {
    let data = pattern(16_384, 33);
    put_object("e2e-twice", "blob", data.clone());

    let mut streamer = Streamer::with_config(object_config(2, 4096)).unwrap();

    for _ in 0..2 {
        let mut buffer = vec![0u8; 16_384];
        let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };
        streamer
            .request(
                &[FileRequest {
                    path: "mem://e2e-twice/blob".to_string(),
                    offset: 0,
                    bytesize: 16_384,
                    sub_sizes: vec![8192, 8192],
                }],
                dst,
                Credentials::default(),
            )
            .unwrap();

        let events = drain(&streamer, 2);
        for event in events {
            assert_eq!(event.ret, ResponseCode::Success);
        }
        assert_eq!(buffer, data);
    }
}

#[test]
fn test_large_object_spanning_workers_and_chunks() {
    // larger than one worker share and several chunks per share
    let data = pattern(1 << 20, 39);
    put_object("e2e-large", "big.bin", data.clone());

    let mut streamer = Streamer::with_config(object_config(4, 65536)).unwrap();
    let mut buffer = vec![0u8; 1 << 20];
    let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };

    streamer
        .request(
            &[FileRequest::whole("mem://e2e-large/big.bin", 0, 1 << 20)],
            dst,
            Credentials::default(),
        )
        .unwrap();

    let events = drain(&streamer, 1);
    assert_eq!(events[0].ret, ResponseCode::Success);
    assert_eq!(buffer, data);
}
