//! Process-local peer router
//!
//! Maps advertised addresses to in-memory environments so that peers
//! living in the same process invoke each other directly instead of going
//! through the remote client. Environments register on construction and
//! deregister on close. Never hold another lock while holding this one.

use crate::environment::Environment;
use nixie_core::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

type Router = RwLock<HashMap<String, Arc<Environment>>>;

fn router() -> &'static Router {
    static ROUTER: OnceLock<Router> = OnceLock::new();
    ROUTER.get_or_init(|| RwLock::new(HashMap::new()))
}

pub(crate) fn register(address: &str, environment: Arc<Environment>) -> Result<()> {
    let mut entries = router().write().expect("peer router poisoned");
    if entries.contains_key(address) {
        return Err(Error::internal(format!(
            "address: {address} is already registered in the peer router"
        )));
    }
    entries.insert(address.to_string(), environment);
    Ok(())
}

pub(crate) fn lookup(address: &str) -> Option<Arc<Environment>> {
    router()
        .read()
        .expect("peer router poisoned")
        .get(address)
        .cloned()
}

pub(crate) fn deregister(address: &str) {
    router()
        .write()
        .expect("peer router poisoned")
        .remove(address);
}
