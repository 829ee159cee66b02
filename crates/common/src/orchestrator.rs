// SMB Launcher - Connection Orchestrator
// Drives one connection attempt: parse, authenticate, enumerate, locate the
// local mount and hand it to the file browser

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::config::ServerProfile;
use crate::error::{Error, Result};
use crate::mount::{LocalFilesystem, MountResolver};
use crate::network::{parse_address, ShareAddress};
use crate::settings::Settings;
use crate::smb::{Credentials, ShareClient, ShareSession};
use crate::types::{ConnectState, ConnectedShare, ShareInfo};

/// Receives the state of a running connection attempt
pub trait ConnectObserver {
    fn on_state(&mut self, _state: &ConnectState) {}
}

/// Observer that ignores every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ConnectObserver for NoopObserver {}

/// Runs connection attempts, at most one at a time
pub struct ConnectionOrchestrator<C: ShareClient, F: LocalFilesystem> {
    client: C,
    fs: F,
    resolver: MountResolver,
    default_port: u16,
    workgroup: String,
    open_browser: bool,
    in_flight: AtomicBool,
}

impl<C: ShareClient, F: LocalFilesystem> ConnectionOrchestrator<C, F> {
    pub fn new(client: C, fs: F, settings: &Settings) -> Self {
        Self {
            client,
            fs,
            resolver: MountResolver::new(settings.mount_root.clone()),
            default_port: settings.port,
            workgroup: settings.workgroup.clone(),
            open_browser: settings.open_browser,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn set_open_browser(&mut self, open_browser: bool) {
        self.open_browser = open_browser;
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Connect to the profile's server and open its mounted share
    ///
    /// Fails with [`Error::Busy`] without touching the network if another
    /// attempt is still running.
    pub fn connect(
        &self,
        profile: &ServerProfile,
        observer: &mut dyn ConnectObserver,
    ) -> Result<ConnectedShare> {
        let _flight = match InFlightGuard::acquire(&self.in_flight) {
            Ok(guard) => guard,
            Err(e) => {
                observer.on_state(&ConnectState::Failed(e.kind()));
                return Err(e);
            }
        };

        match self.run(profile, observer) {
            Ok(connected) => {
                info!(
                    "Opened share {} of {} at {}",
                    connected.share,
                    profile.name,
                    connected.local_path.display()
                );
                report(observer, ConnectState::Done(connected.local_path.clone()));
                Ok(connected)
            }
            Err(e) => {
                debug!("Connection to {} failed: {}", profile.name, e);
                report(observer, ConnectState::Failed(e.kind()));
                Err(e)
            }
        }
    }

    /// Authenticate and list the server's shares without checking mounts
    pub fn shares(&self, profile: &ServerProfile) -> Result<(ShareAddress, Vec<ShareInfo>)> {
        let _flight = InFlightGuard::acquire(&self.in_flight)?;
        let address = parse_address(&profile.address)?;
        let shares = self.enumerate(profile, &address)?;
        Ok((address, shares))
    }

    fn run(
        &self,
        profile: &ServerProfile,
        observer: &mut dyn ConnectObserver,
    ) -> Result<ConnectedShare> {
        report(observer, ConnectState::Parsing);
        let address = parse_address(&profile.address)?;

        report(observer, ConnectState::Connecting);
        let mut session = self.open_session(profile, &address)?;

        report(observer, ConnectState::Enumerating);
        let shares = session.list_shares()?;
        session.finish();

        let share = select_share(address.share.as_deref(), &shares)?;

        report(observer, ConnectState::ResolvingMount);
        let local_path = self.resolver.locate(&self.fs, &share)?;

        let opened = if self.open_browser {
            report(observer, ConnectState::OpeningBrowser);
            self.open(&local_path)?;
            true
        } else {
            false
        };

        Ok(ConnectedShare {
            share,
            local_path,
            shares,
            opened,
        })
    }

    fn enumerate(&self, profile: &ServerProfile, address: &ShareAddress) -> Result<Vec<ShareInfo>> {
        let mut session = self.open_session(profile, address)?;
        let shares = session.list_shares()?;
        session.finish();
        Ok(shares)
    }

    fn open_session(
        &self,
        profile: &ServerProfile,
        address: &ShareAddress,
    ) -> Result<SessionGuard<C::Session>> {
        let port = address.port.unwrap_or(self.default_port);
        let credentials = Credentials::new(&profile.username, &profile.password, &self.workgroup);
        debug!("Connecting to {}:{} for profile {}", address.host, port, profile.name);
        let session = self.client.connect(&address.host, port, &credentials)?;
        Ok(SessionGuard::new(session))
    }

    fn open(&self, path: &Path) -> Result<()> {
        self.fs.open_in_browser(path).map_err(|e| match e {
            Error::OpenFailed { .. } => e,
            other => Error::OpenFailed {
                path: path.to_path_buf(),
                reason: other.to_string(),
            },
        })
    }
}

fn report(observer: &mut dyn ConnectObserver, state: ConnectState) {
    debug!("Connect state: {}", state);
    observer.on_state(&state);
}

/// Pick the share to open from the enumerated list
///
/// A share named in the address is used even when the server does not list
/// it; a case-insensitive match takes the server's spelling. Without one, the
/// only browsable disk share is used.
pub fn select_share(requested: Option<&str>, shares: &[ShareInfo]) -> Result<String> {
    if let Some(name) = requested {
        return match shares.iter().find(|s| s.name.eq_ignore_ascii_case(name)) {
            Some(found) => Ok(found.name.clone()),
            None => {
                debug!("Share {} was not enumerated by the server, using it as given", name);
                Ok(name.to_string())
            }
        };
    }

    let browsable: Vec<&ShareInfo> = shares.iter().filter(|s| s.is_browsable()).collect();
    match browsable.as_slice() {
        [only] => Ok(only.name.clone()),
        [] => Err(Error::ShareNotFound(
            "no share in address and the server exports no disk shares".to_string(),
        )),
        many => Err(Error::ShareNotFound(format!(
            "no share in address; choose one of: {}",
            many.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", ")
        ))),
    }
}

/// Clears the in-flight flag when the attempt ends
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy)?;
        Ok(Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Closes the wrapped session when dropped
struct SessionGuard<S: ShareSession> {
    session: Option<S>,
}

impl<S: ShareSession> SessionGuard<S> {
    fn new(session: S) -> Self {
        Self {
            session: Some(session),
        }
    }

    fn list_shares(&mut self) -> Result<Vec<ShareInfo>> {
        match self.session.as_mut() {
            Some(session) => session.list_shares(),
            None => Err(Error::Protocol("session is not authenticated".to_string())),
        }
    }

    fn finish(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close() {
                warn!("Failed to close SMB session: {}", e);
            }
        }
    }
}

impl<S: ShareSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.finish();
    }
}
