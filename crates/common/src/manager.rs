// SMB Launcher - Server Manager
// Front-end facing operations over the profile store and the orchestrator

use crate::config::ServerProfile;
use crate::error::Result;
use crate::mount::{LocalFilesystem, SystemFilesystem};
use crate::network::ShareAddress;
use crate::orchestrator::{ConnectObserver, ConnectionOrchestrator};
use crate::profile_manager::ProfileStore;
use crate::settings::{AppPaths, Settings};
use crate::smb::{ShareClient, SmbClient};
use crate::types::{ConnectedShare, ShareInfo};

/// Manager wired to the real SMB client and filesystem
pub type SystemServerManager = ServerManager<SmbClient, SystemFilesystem>;

/// Profile CRUD plus connection attempts, addressed by list position
pub struct ServerManager<C: ShareClient, F: LocalFilesystem> {
    store: ProfileStore,
    orchestrator: ConnectionOrchestrator<C, F>,
}

impl SystemServerManager {
    /// Load the profile store and settings from `paths`
    pub fn open(paths: &AppPaths) -> Result<Self> {
        let settings = Settings::load(&paths.settings_file())?;
        let store = ProfileStore::open(paths.profiles_file())?;
        let client = SmbClient::new(settings.connect_timeout());
        let orchestrator = ConnectionOrchestrator::new(client, SystemFilesystem, &settings);
        Ok(Self::new(store, orchestrator))
    }
}

impl<C: ShareClient, F: LocalFilesystem> ServerManager<C, F> {
    pub fn new(store: ProfileStore, orchestrator: ConnectionOrchestrator<C, F>) -> Self {
        Self {
            store,
            orchestrator,
        }
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    pub fn orchestrator(&self) -> &ConnectionOrchestrator<C, F> {
        &self.orchestrator
    }

    pub fn orchestrator_mut(&mut self) -> &mut ConnectionOrchestrator<C, F> {
        &mut self.orchestrator
    }

    pub fn list_profiles(&self) -> &[ServerProfile] {
        self.store.profiles()
    }

    pub fn profile(&self, index: usize) -> Result<&ServerProfile> {
        self.store.get(index)
    }

    pub fn add_profile(&mut self, profile: ServerProfile) -> Result<usize> {
        self.store.add(profile)
    }

    pub fn edit_profile(&mut self, index: usize, profile: ServerProfile) -> Result<()> {
        self.store.edit(index, profile)
    }

    pub fn delete_profile(&mut self, index: usize) -> Result<ServerProfile> {
        self.store.delete(index)
    }

    /// Run a full connection attempt for the profile at `index`
    pub fn connect(
        &self,
        index: usize,
        observer: &mut dyn ConnectObserver,
    ) -> Result<ConnectedShare> {
        let profile = self.store.get(index)?;
        self.orchestrator.connect(profile, observer)
    }

    /// Enumerate the shares of the profile's server
    pub fn shares(&self, index: usize) -> Result<(ShareAddress, Vec<ShareInfo>)> {
        let profile = self.store.get(index)?;
        self.orchestrator.shares(profile)
    }
}
