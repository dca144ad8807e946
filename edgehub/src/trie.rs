use std::clone::Clone;
use std::cmp::Eq;
use std::default::Default;
use std::fmt;
use std::fmt::Debug;
use std::hash::Hash;

use crate::topic::{Level, Topic};
use crate::types::{HashMap, HashSet};

pub type TopicTree<V> = Node<V>;

pub struct Node<V> {
    values: HashSet<V>,
    branches: HashMap<Level, Node<V>>,
}

impl<V> Default for Node<V> {
    #[inline]
    fn default() -> Node<V> {
        Self { values: HashSet::default(), branches: HashMap::default() }
    }
}

impl<V> Node<V>
where
    V: Hash + Eq + Clone + Debug,
{
    /// Returns true when the value is new, false when it replaced an
    /// equal value already stored under the same pattern.
    #[inline]
    pub fn insert(&mut self, topic_filter: &Topic, value: V) -> bool {
        let mut path = topic_filter.levels().clone();
        path.reverse();
        self._insert(path, value)
    }

    #[inline]
    fn _insert(&mut self, mut path: Vec<Level>, value: V) -> bool {
        if let Some(first) = path.pop() {
            self.branches.entry(first).or_default()._insert(path, value)
        } else {
            self.values.replace(value).is_none()
        }
    }

    /// Removal is idempotent, a second call for the same pair returns false.
    /// Nodes left without values and branches are pruned on the way out.
    #[inline]
    pub fn remove(&mut self, topic_filter: &Topic, value: &V) -> bool {
        self._remove(topic_filter.levels().as_ref(), value)
    }

    #[inline]
    fn _remove(&mut self, path: &[Level], value: &V) -> bool {
        if path.is_empty() {
            self.values.remove(value)
        } else {
            let t = &path[0];
            if let Some(x) = self.branches.get_mut(t) {
                let res = x._remove(&path[1..], value);
                if x.values.is_empty() && x.branches.is_empty() {
                    self.branches.remove(t);
                }
                res
            } else {
                false
            }
        }
    }

    /// Collects the union of values whose patterns match `topic`.
    #[inline]
    pub fn matches(&self, topic: &Topic) -> Vec<V> {
        let mut out = Vec::new();
        self._matches(topic.levels(), &mut out);
        out
    }

    #[inline]
    fn _matches(&self, path: &[Level], out: &mut Vec<V>) {
        if path.is_empty() {
            //A trailing # also matches the parent level itself
            if let Some(n) = self.branches.get(&Level::MultiWildcard) {
                out.extend(n.values.iter().cloned());
            }
            out.extend(self.values.iter().cloned());
        } else {
            //Multilayer matching
            if let Some(n) = self.branches.get(&Level::MultiWildcard) {
                out.extend(n.values.iter().cloned());
            }

            //Single layer matching
            if let Some(n) = self.branches.get(&Level::SingleWildcard) {
                n._matches(&path[1..], out);
            }

            //Precise matching
            if let Some(n) = self.branches.get(&path[0]) {
                n._matches(&path[1..], out);
            }
        }
    }

    #[inline]
    pub fn values_size(&self) -> usize {
        let len: usize = self.branches.iter().map(|(_, n)| n.values_size()).sum();
        self.values.len() + len
    }

    #[inline]
    pub fn nodes_size(&self) -> usize {
        let len: usize = self.branches.iter().map(|(_, n)| n.nodes_size()).sum();
        self.branches.len() + len
    }
}

impl<V> Debug for Node<V>
where
    V: Hash + Eq + Clone + Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node {{ nodes_size: {}, values_size: {} }}", self.nodes_size(), self.values_size())
    }
}

#[cfg(test)]
mod tests {
    use super::{Topic, TopicTree};
    use std::str::FromStr;

    fn match_one(topics: &TopicTree<u64>, topic: &str, vs: &[u64]) -> bool {
        let t = Topic::from_str(topic).unwrap();
        let mut matched = topics.matches(&t);
        matched.sort_unstable();
        let mut expected = vs.to_vec();
        expected.sort_unstable();
        matched == expected
    }

    #[test]
    fn test_matches() {
        let mut topics: TopicTree<u64> = TopicTree::default();
        topics.insert(&Topic::from_str("/edge/b/x").unwrap(), 1);
        topics.insert(&Topic::from_str("/edge/b/x").unwrap(), 2);
        topics.insert(&Topic::from_str("/edge/b/y").unwrap(), 3);
        topics.insert(&Topic::from_str("/edge/cc/dd").unwrap(), 4);
        topics.insert(&Topic::from_str("/dev/22/#").unwrap(), 5);
        topics.insert(&Topic::from_str("/dev/+/+").unwrap(), 6);
        topics.insert(&Topic::from_str("/app/yy/zz").unwrap(), 7);
        topics.insert(&Topic::from_str("/app").unwrap(), 8);

        assert!(match_one(&topics, "/edge/b/x", &[1, 2]));
        assert!(match_one(&topics, "/edge/b/y", &[3]));
        assert!(match_one(&topics, "/edge/cc/dd", &[4]));
        assert!(!match_one(&topics, "/edge/cc/dd", &[0]));
        assert!(match_one(&topics, "/dev/a/b", &[6]));
        assert!(match_one(&topics, "/app/yy/zz", &[7]));
        assert!(match_one(&topics, "/dev/22/1/2", &[5]));
        assert!(match_one(&topics, "/dev/22/1", &[5, 6]));
        assert!(match_one(&topics, "/dev/22/", &[5, 6]));
        assert!(match_one(&topics, "/dev/22", &[5]));
        assert!(match_one(&topics, "/nothing/here", &[]));
    }

    #[test]
    fn test_parent_multi_wildcard() {
        let mut topics: TopicTree<u64> = TopicTree::default();
        topics.insert(&Topic::from_str("sensor/#").unwrap(), 1);

        assert!(match_one(&topics, "sensor", &[1]));
        assert!(match_one(&topics, "sensor/a", &[1]));
        assert!(match_one(&topics, "sensor/a/b/c", &[1]));
        assert!(match_one(&topics, "sensors", &[]));
    }

    #[test]
    fn test_union() {
        let mut topics: TopicTree<u64> = TopicTree::default();
        topics.insert(&Topic::from_str("a/b").unwrap(), 1);
        topics.insert(&Topic::from_str("a/#").unwrap(), 2);
        topics.insert(&Topic::from_str("a/+").unwrap(), 3);

        assert!(match_one(&topics, "a/b", &[1, 2, 3]));
        assert!(match_one(&topics, "a/c", &[2, 3]));
        assert!(match_one(&topics, "a", &[2]));
    }

    #[test]
    fn test_remove_prunes() {
        let mut topics: TopicTree<u64> = TopicTree::default();
        assert!(topics.insert(&Topic::from_str("/edge/b/x").unwrap(), 1));
        assert!(!topics.insert(&Topic::from_str("/edge/b/x").unwrap(), 1));
        topics.insert(&Topic::from_str("/edge/b/y").unwrap(), 2);

        assert_eq!(topics.values_size(), 2);
        assert_eq!(topics.nodes_size(), 5);

        assert!(topics.remove(&Topic::from_str("/edge/b/y").unwrap(), &2));
        assert!(!topics.remove(&Topic::from_str("/edge/b/y").unwrap(), &2));
        assert!(!topics.remove(&Topic::from_str("/edge/zz").unwrap(), &1));

        assert_eq!(topics.values_size(), 1);
        assert_eq!(topics.nodes_size(), 4);
        assert!(match_one(&topics, "/edge/b/y", &[]));
        assert!(match_one(&topics, "/edge/b/x", &[1]));

        assert!(topics.remove(&Topic::from_str("/edge/b/x").unwrap(), &1));
        assert_eq!(topics.values_size(), 0);
        assert_eq!(topics.nodes_size(), 0);
    }
}
