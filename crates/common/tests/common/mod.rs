//! In-process stand-ins for the network and the local filesystem.
//!
//! `FakeClient` hands out sessions that report a fixed share list and count
//! how often they were opened and closed. An optional gate makes `connect`
//! block until the test releases it, which keeps an attempt in flight.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use smb_launcher_common::{
    Credentials, Error, LocalFilesystem, Result, ShareClient, ShareInfo, ShareSession,
};

#[derive(Debug, Default)]
pub struct Calls {
    pub connects: Vec<(String, u16, String)>,
    pub sessions_open: usize,
    pub sessions_closed: usize,
    pub opened: Vec<PathBuf>,
}

pub type SharedCalls = Arc<Mutex<Calls>>;

pub struct Gate {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

pub struct FakeClient {
    pub shares: Vec<ShareInfo>,
    pub reachable: bool,
    pub calls: SharedCalls,
    gate: Option<Gate>,
}

impl FakeClient {
    pub fn new(shares: Vec<ShareInfo>, calls: SharedCalls) -> Self {
        Self {
            shares,
            reachable: true,
            calls,
            gate: None,
        }
    }

    pub fn unreachable(calls: SharedCalls) -> Self {
        Self {
            reachable: false,
            ..Self::new(Vec::new(), calls)
        }
    }

    /// Block every `connect` until the returned sender fires; the receiver
    /// signals when a connect call has started waiting
    pub fn gated(mut self) -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        self.gate = Some(Gate {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        (self, entered_rx, release_tx)
    }
}

impl ShareClient for FakeClient {
    type Session = FakeSession;

    fn connect(&self, host: &str, port: u16, credentials: &Credentials) -> Result<FakeSession> {
        self.calls
            .lock()
            .unwrap()
            .connects
            .push((host.to_string(), port, credentials.user.clone()));

        if let Some(gate) = &self.gate {
            gate.entered.lock().unwrap().send(()).unwrap();
            gate.release.lock().unwrap().recv().unwrap();
        }

        if !self.reachable {
            return Err(Error::Network(format!("Timed out talking to {host}:{port}")));
        }
        self.calls.lock().unwrap().sessions_open += 1;
        Ok(FakeSession {
            shares: self.shares.clone(),
            calls: self.calls.clone(),
            closed: false,
        })
    }
}

pub struct FakeSession {
    shares: Vec<ShareInfo>,
    calls: SharedCalls,
    closed: bool,
}

impl ShareSession for FakeSession {
    fn list_shares(&mut self) -> Result<Vec<ShareInfo>> {
        if self.closed {
            return Err(Error::Protocol("session is not authenticated".to_string()));
        }
        Ok(self.shares.clone())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.calls.lock().unwrap().sessions_closed += 1;
        }
        Ok(())
    }
}

/// Filesystem where only the listed paths exist
pub struct FakeFs {
    pub existing: Vec<PathBuf>,
    pub calls: SharedCalls,
}

impl LocalFilesystem for FakeFs {
    fn exists(&self, path: &Path) -> bool {
        self.existing.iter().any(|p| p == path)
    }

    fn open_in_browser(&self, path: &Path) -> Result<()> {
        self.calls.lock().unwrap().opened.push(path.to_path_buf());
        Ok(())
    }
}
