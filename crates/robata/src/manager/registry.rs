use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;
use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::graph::{Graph, Session, SharedGraph};
use crate::sync::{lock, read, write};
use crate::types::Device;
use super::resource::Resource;

/// State of one manager in the tree.
///
/// Children hold their parent; parents only know their children's uids
/// through the resource table.
pub(crate) struct ManagerNode<B: Backend> {
    pub(crate) uid: String,
    pub(crate) parent: Option<Arc<ManagerNode<B>>>,
    pub(crate) device: Device,
    pub(crate) is_root: bool,
    pub(crate) closed: AtomicBool,
    pub(crate) resources: Mutex<HashMap<String, Resource<B>>>,
    pub(crate) session: RwLock<Option<Arc<Session<B>>>>,
}

impl<B: Backend> ManagerNode<B> {
    pub(crate) fn new(parent: Option<Arc<ManagerNode<B>>>, device: Device) -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            is_root: parent.is_none(),
            parent,
            device,
            closed: AtomicBool::new(false),
            resources: Mutex::new(HashMap::new()),
            session: RwLock::new(None),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Adds `resource` under `uid`, failing once the manager has started closing.
    /// The root keeps no table.
    ///
    /// A replaced entry is dropped after the table lock is released: dropping
    /// the last handle of an array detaches it from its owner, which may be
    /// this manager.
    pub(crate) fn attach(&self, uid: &str, resource: Resource<B>) -> Result<()> {
        if self.is_root {
            return Ok(());
        }
        let replaced = {
            let mut resources = lock(&self.resources);
            if self.is_closed() {
                return Err(Error::IllegalState(format!("manager {} is closed", self.uid)));
            }
            resources.insert(uid.to_string(), resource)
        };
        drop(replaced);
        Ok(())
    }

    /// Removes the entry under `uid`, returning whether it was present.
    /// The root keeps no table and always reports `true`.
    pub(crate) fn detach(&self, uid: &str) -> bool {
        if self.is_root {
            return true;
        }
        let removed = lock(&self.resources).remove(uid);
        removed.is_some()
    }
}

/// Arena of every live manager of one engine, plus the state they share.
pub(crate) struct Registry<B: Backend> {
    pub(crate) backend: Arc<B>,
    pub(crate) graph: SharedGraph<B::Tensor>,
    managers: RwLock<HashMap<String, Arc<ManagerNode<B>>>>,
}

impl<B: Backend> Registry<B> {
    /// Builds the arena and its root manager, which always carries a session
    pub(crate) fn new(backend: B, device: Device) -> (Arc<Self>, Arc<ManagerNode<B>>) {
        let backend = Arc::new(backend);
        let graph = Arc::new(RwLock::new(Graph::new()));
        let root = Arc::new(ManagerNode::new(None, device));
        *write(&root.session) = Some(Arc::new(Session::new(backend.clone(), graph.clone())));

        let registry = Arc::new(Self {
            backend,
            graph,
            managers: RwLock::new(HashMap::new()),
        });
        registry.register(root.clone());
        (registry, root)
    }

    pub(crate) fn register(&self, node: Arc<ManagerNode<B>>) {
        write(&self.managers).insert(node.uid.clone(), node);
    }

    pub(crate) fn get(&self, uid: &str) -> Option<Arc<ManagerNode<B>>> {
        read(&self.managers).get(uid).cloned()
    }

    pub(crate) fn remove(&self, uid: &str) {
        write(&self.managers).remove(uid);
    }

    /// Live managers whose parent is `uid`
    pub(crate) fn children_of(&self, uid: &str) -> Vec<Arc<ManagerNode<B>>> {
        read(&self.managers)
            .values()
            .filter(|node| node.parent.as_ref().is_some_and(|parent| parent.uid == uid))
            .cloned()
            .collect()
    }

    /// Number of live managers, the root included
    pub(crate) fn len(&self) -> usize {
        read(&self.managers).len()
    }
}
