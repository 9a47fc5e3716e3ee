// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Drive the serve loop and mount handshake over the in-process bus.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::thread;

use fscore::fs_wire::{
    Codec, Ident, ProcessId, Request, RequestBody, Response, ResponseBody, ResultCode,
    MAX_PATH_LEN, STAGING_LEN,
};
use fscore::{
    Endpoint, FileSystem, FsClient, FsConfig, FsError, InProcessBus, InProcessEndpoint,
    MemoryStore, SharedMemory,
};

const SERVER: ProcessId = ProcessId::from_raw(2);
const CLIENT: ProcessId = ProcessId::from_raw(20);

fn spawn_server(
    bus: &InProcessBus,
    config: FsConfig,
    store: MemoryStore,
    memory: SharedMemory,
) -> thread::JoinHandle<Result<FileSystem<MemoryStore, SharedMemory>, FsError>> {
    let mut endpoint = bus.attach(config.server_pid()).unwrap();
    thread::spawn(move || {
        let mut fs = FileSystem::new(config, store, memory);
        fs.mount(&mut endpoint)?;
        fs.serve(&mut endpoint)?;
        Ok(fs)
    })
}

fn namespace(mut endpoint: InProcessEndpoint, result: ResultCode) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let (from, request) = endpoint.receive().unwrap();
        let tag = request.tag;
        let path = match request.body {
            RequestBody::Mount { path } => path,
            other => panic!("expected mount, got {other:?}"),
        };
        let response = Response {
            tag,
            body: ResponseBody::Mount { result },
        };
        endpoint.reply(from, &response).unwrap();
        path
    })
}

#[test]
fn client_reads_file_and_server_stops_on_disconnect() {
    let bus = InProcessBus::new();
    let memory = SharedMemory::new();
    let mut store = MemoryStore::new();
    let body: Vec<u8> = (0..3000u32).map(|i| (i % 7) as u8 + b'a').collect();
    store.insert_static("/srv/big", body.clone()).unwrap();
    let server = spawn_server(&bus, FsConfig::default(), store, memory.clone());

    let mut client = FsClient::new(bus.attach(CLIENT).unwrap(), memory, SERVER);
    let ident = client.open("/srv/big").unwrap();
    assert_eq!(client.read_to_end(ident).unwrap(), body);
    client.close(ident).unwrap();
    assert!(matches!(
        client.open("/srv/none"),
        Err(FsError::Remote(ResultCode::NotFound))
    ));

    bus.detach(SERVER);
    let fs = server.join().unwrap().unwrap();
    // open, 3 data reads + end of file, close, failed open
    assert_eq!(fs.served(), 7);
    let id = fs.cache().find("/srv/big").unwrap();
    assert_eq!(fs.cache().get(id).unwrap().open_count(), 0);
}

#[test]
fn large_read_count_does_not_grow_client_region() {
    let bus = InProcessBus::new();
    let memory = SharedMemory::new();
    let mut store = MemoryStore::new();
    store.insert_static("/f", "abcd").unwrap();
    let server = spawn_server(&bus, FsConfig::default(), store, memory.clone());

    let mut client = FsClient::new(bus.attach(CLIENT).unwrap(), memory.clone(), SERVER);
    let before = memory.mapped_len(CLIENT);
    assert_eq!(before, Some(MAX_PATH_LEN + STAGING_LEN));

    let ident = client.open("/f").unwrap();
    assert_eq!(client.read(ident, 0, 256 << 20).unwrap(), b"abcd");
    assert_eq!(memory.mapped_len(CLIENT), before);

    bus.detach(SERVER);
    server.join().unwrap().unwrap();
}

#[test]
fn mount_handshake_registers_path() {
    let bus = InProcessBus::new();
    let ns = namespace(bus.attach(ProcessId::NAMESPACE).unwrap(), ResultCode::Success);
    let config = FsConfig {
        mount_path: "/srv//docs/".into(),
        namespace_pid: Some(ProcessId::NAMESPACE.into_raw()),
        ..FsConfig::default()
    };
    let server = spawn_server(&bus, config, MemoryStore::new(), SharedMemory::new());

    assert_eq!(ns.join().unwrap(), "/srv/docs");
    bus.detach(SERVER);
    assert!(server.join().unwrap().is_ok());
}

#[test]
fn rejected_mount_is_reported() {
    let bus = InProcessBus::new();
    let ns = namespace(
        bus.attach(ProcessId::NAMESPACE).unwrap(),
        ResultCode::AccessDenied,
    );
    let config = FsConfig {
        namespace_pid: Some(ProcessId::NAMESPACE.into_raw()),
        ..FsConfig::default()
    };
    let server = spawn_server(&bus, config, MemoryStore::new(), SharedMemory::new());

    ns.join().unwrap();
    assert!(matches!(
        server.join().unwrap(),
        Err(FsError::MountRejected(ResultCode::AccessDenied))
    ));
}

#[test]
fn malformed_frames_are_dropped() {
    let bus = InProcessBus::new();
    let memory = SharedMemory::new();
    let mut store = MemoryStore::new();
    store.insert_static("/ok", "fine").unwrap();
    let server = spawn_server(&bus, FsConfig::default(), store, memory.clone());

    let mut raw = bus.attach(ProcessId::from_raw(30)).unwrap();
    let mut frame = Codec
        .encode_request(&Request {
            tag: 1,
            body: RequestBody::CloseFile {
                ident: Ident::from_raw(1),
            },
        })
        .unwrap();
    frame[4] = 0x7F;
    raw.send_raw(SERVER, frame).unwrap();
    raw.send_raw(SERVER, vec![0xFF; 3]).unwrap();

    // The server answers the next valid request after dropping both.
    let close = Request {
        tag: 9,
        body: RequestBody::CloseFile {
            ident: Ident::from_raw(1),
        },
    };
    let response = raw.call(SERVER, &close).unwrap();
    assert_eq!(response.tag, 9);
    assert_eq!(response.body.result(), ResultCode::Success);

    let mut client = FsClient::new(bus.attach(CLIENT).unwrap(), memory, SERVER);
    assert_eq!(client.cat("/ok").unwrap(), b"fine");

    bus.detach(SERVER);
    assert!(server.join().unwrap().is_ok());
}

#[test]
fn server_refuses_mount_requests_from_clients() {
    let bus = InProcessBus::new();
    let server = spawn_server(&bus, FsConfig::default(), MemoryStore::new(), SharedMemory::new());
    let mut raw = bus.attach(CLIENT).unwrap();
    let response = raw
        .call(
            SERVER,
            &Request {
                tag: 3,
                body: RequestBody::Mount { path: "/".into() },
            },
        )
        .unwrap();
    assert_eq!(
        response.body,
        ResponseBody::Mount {
            result: ResultCode::InvalidArgument
        }
    );
    bus.detach(SERVER);
    assert!(server.join().unwrap().is_ok());
}
