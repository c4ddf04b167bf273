//! Compiled-template cache keyed by canonical filename.
//!
//! Shared between threads.  A store replaces the whole entry under the write
//! lock, so racing compiles of one file leave exactly one routine behind
//! (whichever finished last).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use log::debug;

use crate::Template;

#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: RwLock<HashMap<PathBuf, Arc<Template>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Path) -> Option<Arc<Template>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    /// Store `template` under `key`, replacing any previous entry.
    pub fn put(&self, key: PathBuf, template: Arc<Template>) {
        debug!("cache store {}", key.display());
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, template);
    }

    pub fn remove(&self, key: &Path) -> Option<Arc<Template>> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key)
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Op, Program};
    use std::thread;

    fn template(text: &str) -> Arc<Template> {
        Arc::new(Template::new(Program::new("template", vec![Op::Text(text.into())]), Vec::new()))
    }

    #[test]
    fn put_replaces() {
        let cache = TemplateCache::new();
        let key = PathBuf::from("/v/a.pug");
        cache.put(key.clone(), template("1"));
        cache.put(key.clone(), template("2"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key).unwrap().render(&Default::default()).unwrap(), "2");
        cache.remove(&key);
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_stores_leave_one_entry() {
        let cache = Arc::new(TemplateCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.put(PathBuf::from("/v/x.pug"), template(&i.to_string())))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 1);
        let out = cache.get(Path::new("/v/x.pug")).unwrap().render(&Default::default()).unwrap();
        assert!(out.parse::<u32>().unwrap() < 8);
    }
}
