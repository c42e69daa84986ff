//! Read access to the client's object tree.

use std::sync::RwLock;

use lwm2m_core::{Link, ServersInfo};

/// What the engine needs from the object model.
pub trait ObjectTree: Send + Sync {
    /// Servers currently provisioned (security and server objects).
    fn servers_info(&self) -> ServersInfo;

    /// Object links advertised at registration.
    fn object_links(&self) -> Vec<Link>;
}

/// Object tree kept in memory; bootstrap writes go through [`InMemoryObjectTree::set_servers_info`].
#[derive(Debug, Default)]
pub struct InMemoryObjectTree {
    servers: RwLock<ServersInfo>,
    links: RwLock<Vec<Link>>,
}

impl InMemoryObjectTree {
    /// Tree exposing `servers` and advertising `links`.
    pub fn new(servers: ServersInfo, links: Vec<Link>) -> Self {
        Self {
            servers: RwLock::new(servers),
            links: RwLock::new(links),
        }
    }

    /// Replaces the provisioned servers.
    pub fn set_servers_info(&self, servers: ServersInfo) {
        *self.servers.write().unwrap_or_else(|e| e.into_inner()) = servers;
    }

    /// Replaces the advertised object links.
    pub fn set_object_links(&self, links: Vec<Link>) {
        *self.links.write().unwrap_or_else(|e| e.into_inner()) = links;
    }
}

impl ObjectTree for InMemoryObjectTree {
    fn servers_info(&self) -> ServersInfo {
        self.servers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn object_links(&self) -> Vec<Link> {
        self.links.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
