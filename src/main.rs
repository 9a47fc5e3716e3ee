// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Host binary running a filesystem server and a client on an in-process bus.
// Author: Lukas Bower

//! `fscore` serves files from an in-memory store and prints the requested
//! paths through the full open/read/close protocol.

use std::io::{self, Write};
use std::path::PathBuf;
use std::thread;

use anyhow::{anyhow, Result};
use clap::Parser;
use fs_wire::{ProcessId, Response, ResponseBody, ResultCode};
use fscore::{
    Endpoint, FileSystem, FsClient, FsConfig, InProcessBus, InProcessEndpoint, MemoryStore,
    SharedMemory,
};
use log::{info, warn};

/// CLI arguments for `fscore`.
#[derive(Parser, Debug)]
#[command(name = "fscore", about = "Filesystem server core demo", version = "0.1")]
struct Cli {
    /// JSON configuration file.
    #[arg(long, env = "FSCORE_CONFIG")]
    config: Option<PathBuf>,
    /// Evict unreferenced entries once all paths were printed.
    #[arg(long)]
    evict: bool,
    /// Process id used by the client.
    #[arg(long, default_value_t = 100)]
    client_pid: u32,
    /// Paths to open and print.
    paths: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => FsConfig::from_file(path)?,
        None => FsConfig::default(),
    };
    let store = MemoryStore::from_files(&config.files)?.with_preload(config.preload);
    let bus = InProcessBus::new();
    let memory = SharedMemory::new();
    let server_pid = config.server_pid();

    let namespace = match config.namespace_pid() {
        Some(pid) => Some(spawn_namespace(bus.attach(pid)?)),
        None => None,
    };
    let mut server_endpoint = bus.attach(server_pid)?;
    let client_endpoint = bus.attach(ProcessId::from_raw(cli.client_pid))?;

    let mut fs = FileSystem::new(config, store, memory.clone());
    let server = thread::spawn(move || -> Result<_, fscore::FsError> {
        fs.mount(&mut server_endpoint)?;
        fs.serve(&mut server_endpoint)?;
        Ok(fs)
    });

    let mut client = FsClient::new(client_endpoint, memory, server_pid);
    let mut stdout = io::stdout().lock();
    let mut failures = 0;
    for path in &cli.paths {
        match client.cat(path) {
            Ok(bytes) => stdout.write_all(&bytes)?,
            Err(err) => {
                eprintln!("{path}: {err}");
                failures += 1;
            }
        }
    }
    stdout.flush()?;

    bus.detach(server_pid);
    let mut fs = server
        .join()
        .map_err(|_| anyhow!("server thread panicked"))??;
    if cli.evict {
        fs.evict();
    }
    info!(
        "[main] served {} requests, {} entries cached",
        fs.served(),
        fs.cache().len()
    );
    if let Some(namespace) = namespace {
        if let Some(pid) = fs.config().namespace_pid() {
            bus.detach(pid);
        }
        namespace
            .join()
            .map_err(|_| anyhow!("namespace thread panicked"))?;
    }
    if failures > 0 {
        return Err(anyhow!("{failures} path(s) could not be read"));
    }
    Ok(())
}

/// Stand-in namespace process accepting every mount.
fn spawn_namespace(mut endpoint: InProcessEndpoint) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok((from, request)) = endpoint.receive() {
            let result = match &request.body {
                fs_wire::RequestBody::Mount { path } => {
                    info!("[ns] {from} mounted {path}");
                    ResultCode::Success
                }
                other => {
                    warn!("[ns] {from} sent {} to the namespace", other.action());
                    ResultCode::InvalidArgument
                }
            };
            let response = Response {
                tag: request.tag,
                body: ResponseBody::Mount { result },
            };
            if let Err(err) = endpoint.reply(from, &response) {
                warn!("[ns] reply to {from} failed: {err}");
            }
        }
    })
}
