use std::collections::{BTreeMap, BTreeSet};

/// Topics and shared-memory segments a module declared during its Init
/// handshake.
///
/// Backed by ordered collections so equality is independent of the order in
/// which the module listed its declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicPubSubInfo {
    pub sub_topics: BTreeSet<String>,
    pub pub_topics: BTreeSet<String>,
    pub sub_shmems: BTreeSet<String>,
    /// Published shared-memory segments with their requested sizes in bytes.
    pub pub_shmems: BTreeMap<String, u64>,
    pub pub_topics_broadcast: BTreeSet<String>,
    pub pub_shmems_broadcast: BTreeSet<String>,
}

impl TopicPubSubInfo {
    pub fn clear(&mut self) {
        self.sub_topics.clear();
        self.pub_topics.clear();
        self.sub_shmems.clear();
        self.pub_shmems.clear();
        self.pub_topics_broadcast.clear();
        self.pub_shmems_broadcast.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.sub_topics.is_empty()
            && self.pub_topics.is_empty()
            && self.sub_shmems.is_empty()
            && self.pub_shmems.is_empty()
            && self.pub_topics_broadcast.is_empty()
            && self.pub_shmems_broadcast.is_empty()
    }
}
