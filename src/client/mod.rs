//! Client facade for the coordination service
//!
//! [`Client`] composes the [`SessionManager`] and the [`NodeManager`]
//! behind one object; it only delegates and logs.
//!
//! # Basic Usage
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use zk_coordinator::transport::memory::MemoryEnsemble;
//! use zk_coordinator::Client;
//! use zk_coordinator::NodeType;
//!
//! let ensemble = MemoryEnsemble::new(["127.0.0.1:2181"]);
//! let client = Client::builder("127.0.0.1:2181")
//!     .connection_timeout(Duration::from_secs(3))
//!     .deterministic_connection_order(true)
//!     .build(Arc::new(ensemble))
//!     .unwrap();
//!
//! client.initialize().unwrap();
//! client.wait_until_connected().unwrap();
//!
//! client.create_node("/app", b"config", NodeType::Persistent).unwrap();
//! let data = client.get_node("/app").unwrap();
//! println!("app data: {:?}", data);
//!
//! client.uninitialize();
//! ```

mod builder;

pub use builder::*;


use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use tracing::info;

use crate::transport::CoordinationTransport;
use crate::ClientConfig;
use crate::NodeEventHandler;
use crate::NodeManager;
use crate::NodeType;
use crate::Result;
use crate::SessionEventHandler;
use crate::SessionManager;
use crate::SessionState;

/// Main entry point for talking to a coordination ensemble
///
/// Created through [`builder()`](Client::builder) or from a loaded
/// [`ClientConfig`]. Use [`session()`](Client::session) and
/// [`nodes()`](Client::nodes) for the less common operations.
pub struct Client {
    session: Arc<SessionManager>,
    nodes: NodeManager,
}

impl Client {
    /// Create a configured client builder for the given ensemble
    pub fn builder(hosts: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(hosts)
    }

    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn CoordinationTransport>,
    ) -> Result<Self> {
        let config = config.validate()?;
        let session = Arc::new(SessionManager::new(config.session, transport)?);
        let nodes = NodeManager::new(session.clone(), config.request.timeout());

        Ok(Self { session, nodes })
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn nodes(&self) -> &NodeManager {
        &self.nodes
    }

    pub fn initialize(&self) -> Result<()> {
        info!(hosts = self.session.host(), "Initializing coordination client");
        self.session.initialize()
    }

    pub fn uninitialize(&self) {
        info!(hosts = self.session.host(), "Uninitializing coordination client");
        self.session.uninitialize()
    }

    pub fn wait_until_connected(&self) -> Result<()> {
        self.session.wait_until_connected()
    }

    pub fn register_event_handler(
        &self,
        handler: Arc<dyn SessionEventHandler>,
    ) -> Result<()> {
        self.session.register_event_handler(handler)
    }

    pub fn unregister_event_handler(&self) -> Result<()> {
        self.session.unregister_event_handler()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn host(&self) -> &str {
        self.session.host()
    }

    pub fn connection_timeout(&self) -> Duration {
        self.session.connection_timeout()
    }

    pub fn expiration_timeout(&self) -> Duration {
        self.session.expiration_timeout()
    }

    pub fn deterministic_connection_order(&self) -> bool {
        self.session.deterministic_connection_order()
    }

    pub fn get_node(
        &self,
        path: &str,
    ) -> Result<Vec<u8>> {
        self.nodes.get_node(path)
    }

    pub fn get_node_with_watch(
        &self,
        path: &str,
        handler: Arc<dyn NodeEventHandler>,
    ) -> Result<Vec<u8>> {
        self.nodes.get_node_with_watch(path, handler)
    }

    pub fn get_node_children(
        &self,
        path: &str,
    ) -> Result<Vec<String>> {
        self.nodes.get_node_children(path)
    }

    pub fn get_node_children_with_watch(
        &self,
        path: &str,
        handler: Arc<dyn NodeEventHandler>,
    ) -> Result<Vec<String>> {
        self.nodes.get_node_children_with_watch(path, handler)
    }

    pub fn create_node(
        &self,
        path: &str,
        data: &[u8],
        node_type: NodeType,
    ) -> Result<bool> {
        let created = self.nodes.create_node(path, data, node_type)?;
        debug!(path, ?node_type, created, "Create node");
        Ok(created)
    }

    pub fn create_sequential_node(
        &self,
        path: &str,
        data: &[u8],
        node_type: NodeType,
    ) -> Result<String> {
        self.nodes.create_sequential_node(path, data, node_type)
    }

    pub fn change_node(
        &self,
        path: &str,
        data: &[u8],
    ) -> Result<()> {
        self.nodes.change_node(path, data)?;
        debug!(path, "Node changed");
        Ok(())
    }

    pub fn delete_node(
        &self,
        path: &str,
    ) -> Result<()> {
        self.nodes.delete_node(path)?;
        debug!(path, "Node deleted");
        Ok(())
    }

    pub fn node_exists(
        &self,
        path: &str,
    ) -> Result<bool> {
        self.nodes.node_exists(path)
    }

    pub fn add_event_handler(
        &self,
        path: &str,
        handler: Arc<dyn NodeEventHandler>,
    ) -> Result<()> {
        self.nodes.add_event_handler(path, handler)
    }

    pub fn remove_event_handler(
        &self,
        path: &str,
    ) -> bool {
        self.nodes.remove_event_handler(path)
    }
}
