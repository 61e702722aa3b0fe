/**
 * REGISTRE DES APPAREILS - Cache mémoire des nœuds, capteurs et drapeaux d'armement
 *
 * RÔLE :
 * Vue immuable (snapshot) de ce que l'autorité registre connaît : nœuds, ids,
 * capteurs par nœud, et drapeau enabled par couple "nœud/capteur".
 *
 * FONCTIONNEMENT :
 * - read()        : clone de l'Arc courant sous verrou lecture, jamais d'itération hors verrou
 * - replace_all() : la boucle de sync remplace la vue entière
 * - merge_*()     : l'auto-enregistrement ajoute une entrée (copie-sur-écriture)
 * - Journal des merges : un remplacement construit depuis un fetch plus ancien
 *   ré-applique les merges postérieurs à son ticket, rien n'est perdu
 *
 * INVARIANT : un drapeau absent vaut "armé" (fail-open).
 */

pub mod autoreg;
pub mod client;

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub use autoreg::{AutoRegistrar, Registration, Step};
pub use client::{HttpRegistryClient, RegistryAuthority};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceRegistrySnapshot {
    nodes: HashSet<String>,
    node_ids: HashMap<String, i64>,
    sensors: HashMap<String, HashSet<String>>,
    flags: HashMap<String, bool>,
}

pub fn flag_key(node: &str, sensor: &str) -> String {
    format!("{node}/{sensor}")
}

impl DeviceRegistrySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_node(&mut self, node: &str, id: Option<i64>) {
        self.nodes.insert(node.to_string());
        if let Some(id) = id {
            self.node_ids.insert(node.to_string(), id);
        }
        self.sensors.entry(node.to_string()).or_default();
    }

    /// `enabled = None` laisse le drapeau absent (donc armé par défaut).
    pub fn insert_sensor(&mut self, node: &str, sensor: &str, enabled: Option<bool>) {
        self.nodes.insert(node.to_string());
        self.sensors.entry(node.to_string()).or_default().insert(sensor.to_string());
        if let Some(enabled) = enabled {
            self.flags.insert(flag_key(node, sensor), enabled);
        }
    }

    pub fn knows_node(&self, node: &str) -> bool {
        self.nodes.contains(node)
    }

    pub fn node_id(&self, node: &str) -> Option<i64> {
        self.node_ids.get(node).copied()
    }

    pub fn knows_sensor(&self, node: &str, sensor: &str) -> bool {
        self.sensors.get(node).is_some_and(|s| s.contains(sensor))
    }

    pub fn flag(&self, node: &str, sensor: &str) -> Option<bool> {
        self.flags.get(&flag_key(node, sensor)).copied()
    }

    pub fn is_enabled(&self, node: &str, sensor: &str) -> bool {
        self.flag(node, sensor).unwrap_or(true)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn apply(&mut self, merge: &Merge) {
        match merge {
            Merge::Node { node, id } => self.insert_node(node, Some(*id)),
            Merge::Sensor { node, sensor } => self.insert_sensor(node, sensor, None),
        }
    }
}

#[derive(Debug, Clone)]
enum Merge {
    Node { node: String, id: i64 },
    Sensor { node: String, sensor: String },
}

/// Position du journal au moment où la sync lance son fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTicket(u64);

struct CacheInner {
    current: Arc<DeviceRegistrySnapshot>,
    journal: Vec<(u64, Merge)>,
    seq: u64,
}

pub struct DeviceRegistryCache {
    inner: RwLock<CacheInner>,
}

impl DeviceRegistryCache {
    pub fn new() -> Self {
        Self::with_snapshot(DeviceRegistrySnapshot::default())
    }

    pub fn with_snapshot(snapshot: DeviceRegistrySnapshot) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                current: Arc::new(snapshot),
                journal: Vec::new(),
                seq: 0,
            }),
        }
    }

    pub fn read(&self) -> Arc<DeviceRegistrySnapshot> {
        self.inner.read().current.clone()
    }

    pub fn sync_ticket(&self) -> SyncTicket {
        SyncTicket(self.inner.read().seq)
    }

    /// Remplacement brut : les merges déjà journalisés sont oubliés.
    pub fn replace_all(&self, snapshot: DeviceRegistrySnapshot) {
        let mut inner = self.inner.write();
        inner.journal.clear();
        inner.current = Arc::new(snapshot);
    }

    /// Remplacement issu d'un fetch démarré à `ticket` : les merges plus récents
    /// que le ticket sont ré-appliqués, les plus anciens sont couverts par le fetch.
    pub fn replace_all_since(&self, mut snapshot: DeviceRegistrySnapshot, ticket: SyncTicket) {
        let mut inner = self.inner.write();
        inner.journal.retain(|(seq, _)| *seq > ticket.0);
        for (_, merge) in &inner.journal {
            snapshot.apply(merge);
        }
        inner.current = Arc::new(snapshot);
    }

    pub fn merge_node(&self, node: &str, id: i64) {
        self.merge(Merge::Node { node: node.to_string(), id });
    }

    pub fn merge_sensor(&self, node: &str, sensor: &str) {
        self.merge(Merge::Sensor { node: node.to_string(), sensor: sensor.to_string() });
    }

    fn merge(&self, merge: Merge) {
        let mut inner = self.inner.write();
        let mut next = (*inner.current).clone();
        next.apply(&merge);
        inner.seq += 1;
        let seq = inner.seq;
        inner.journal.push((seq, merge));
        inner.current = Arc::new(next);
    }
}

impl Default for DeviceRegistryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn snapshot_with(flag: bool) -> DeviceRegistrySnapshot {
        let mut s = DeviceRegistrySnapshot::new();
        s.insert_node("esp01", Some(1));
        for sensor in ["pir", "doppler", "door", "window"] {
            s.insert_sensor("esp01", sensor, Some(flag));
        }
        s
    }

    #[test]
    fn absent_flag_is_enabled() {
        let cache = DeviceRegistryCache::new();
        assert!(cache.read().is_enabled("esp01", "pir"));
        assert_eq!(cache.read().flag("esp01", "pir"), None);

        let mut s = DeviceRegistrySnapshot::new();
        s.insert_sensor("esp01", "pir", Some(false));
        cache.replace_all(s);
        assert!(!cache.read().is_enabled("esp01", "pir"));
        assert!(cache.read().is_enabled("esp01", "doppler"));
        assert!(cache.read().is_enabled("esp02", "pir"));
    }

    #[test]
    fn readers_keep_their_snapshot_after_replace() {
        let cache = DeviceRegistryCache::with_snapshot(snapshot_with(true));
        let before = cache.read();
        cache.replace_all(snapshot_with(false));
        assert!(before.is_enabled("esp01", "pir"));
        assert!(!cache.read().is_enabled("esp01", "pir"));
    }

    #[test]
    fn concurrent_readers_never_see_mixed_flags() {
        let cache = Arc::new(DeviceRegistryCache::with_snapshot(snapshot_with(true)));
        let writer = {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..2_000 {
                    cache.replace_all(snapshot_with(i % 2 == 0));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let snap = cache.read();
                        let flags: Vec<bool> = ["pir", "doppler", "door", "window"]
                            .iter()
                            .map(|s| snap.is_enabled("esp01", s))
                            .collect();
                        assert!(flags.iter().all(|f| *f == flags[0]), "mixed view: {flags:?}");
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }

    #[test]
    fn merges_extend_current_view() {
        let cache = DeviceRegistryCache::new();
        cache.merge_node("esp02", 9);
        cache.merge_sensor("esp02", "pir");
        let snap = cache.read();
        assert!(snap.knows_node("esp02"));
        assert_eq!(snap.node_id("esp02"), Some(9));
        assert!(snap.knows_sensor("esp02", "pir"));
        assert!(snap.is_enabled("esp02", "pir"));
    }

    #[test]
    fn stale_replace_keeps_merges_made_after_its_ticket() {
        let cache = DeviceRegistryCache::new();
        let ticket = cache.sync_ticket();
        // enregistrement concurrent pendant le fetch
        cache.merge_node("esp03", 3);
        cache.merge_sensor("esp03", "pir");

        let mut fetched = DeviceRegistrySnapshot::new();
        fetched.insert_sensor("esp01", "pir", Some(false));
        cache.replace_all_since(fetched, ticket);

        let snap = cache.read();
        assert!(snap.knows_sensor("esp03", "pir"));
        assert_eq!(snap.node_id("esp03"), Some(3));
        assert!(!snap.is_enabled("esp01", "pir"));
    }

    #[test]
    fn replace_after_merge_drops_covered_journal_entries() {
        let cache = DeviceRegistryCache::new();
        cache.merge_node("esp04", 4);
        let ticket = cache.sync_ticket();
        cache.replace_all_since(DeviceRegistrySnapshot::new(), ticket);
        // le fetch démarré après le merge faisait foi : l'entrée n'est pas ressuscitée
        assert!(!cache.read().knows_node("esp04"));
    }
}
