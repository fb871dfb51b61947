//! Maps a kernel `(address family, table id)` pair to whichever owning
//! handle registered it. Registration is exclusive: two protocol
//! instances cannot claim the same kernel table, mirroring the
//! single-owner assumption the scan driver and route installer both
//! depend on.

use crate::error::{Error, Result};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    pub family: u16,
    pub table: u32,
}

pub struct Registry<H> {
    entries: HashMap<Key, H>,
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<H> Registry<H> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, family: u16, table: u32, handle: H) -> Result<()> {
        let key = Key { family, table };
        if self.entries.contains_key(&key) {
            return Err(Error::TableTaken(family as u8, table));
        }
        self.entries.insert(key, handle);
        Ok(())
    }

    pub fn unregister(&mut self, family: u16, table: u32) -> Option<H> {
        self.entries.remove(&Key { family, table })
    }

    #[must_use]
    pub fn lookup(&self, family: u16, table: u32) -> Option<&H> {
        self.entries.get(&Key { family, table })
    }

    pub fn lookup_mut(&mut self, family: u16, table: u32) -> Option<&mut H> {
        self.entries.get_mut(&Key { family, table })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_double_registration_of_the_same_table() {
        let mut reg: Registry<&'static str> = Registry::new();
        reg.register(2, 254, "main").unwrap();
        let err = reg.register(2, 254, "other").unwrap_err();
        assert!(matches!(err, Error::TableTaken(2, 254)));
    }

    #[test]
    fn distinct_families_do_not_collide_on_the_same_table_id() {
        let mut reg: Registry<&'static str> = Registry::new();
        reg.register(2, 254, "v4-main").unwrap();
        reg.register(10, 254, "v6-main").unwrap();
        assert_eq!(reg.lookup(2, 254), Some(&"v4-main"));
        assert_eq!(reg.lookup(10, 254), Some(&"v6-main"));
    }

    #[test]
    fn unregister_frees_the_slot_for_reuse() {
        let mut reg: Registry<&'static str> = Registry::new();
        reg.register(2, 254, "main").unwrap();
        assert!(reg.unregister(2, 254).is_some());
        assert!(reg.register(2, 254, "main2").is_ok());
    }
}
