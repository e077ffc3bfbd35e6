//! Read-only metrics snapshot (`spec.md` §4.G): queue lengths, nothing
//! else. No counters, no histograms — the core intentionally leaves
//! everything beyond queue depth to an external metrics layer.

use crate::directory::Directory;
use crate::entry::QueueName;

/// `spec.md` §4.G `lengths`: every queue name paired with its current
/// length.
pub fn lengths(dir: &Directory) -> Vec<(QueueName, usize)> {
    dir.list("")
        .into_iter()
        .filter_map(|name| dir.get(&name).map(|q| (name, q.length())))
        .collect()
}

/// `spec.md` §4.G `measure`: the length of a single queue, or `None` if
/// it does not exist.
pub fn measure(dir: &Directory, name: &QueueName) -> Option<usize> {
    dir.get(name).map(|q| q.length())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ConnectionId;

    #[test]
    fn lengths_reflects_current_depth() {
        let mut dir = Directory::new();
        dir.add(None, QueueName::new("a"));
        dir.add(Some(ConnectionId::new("c1")), QueueName::new("b"));

        let mut got = lengths(&dir);
        got.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        assert_eq!(
            got,
            vec![(QueueName::new("a"), 0), (QueueName::new("b"), 0)]
        );
    }

    #[test]
    fn measure_is_none_for_missing_queue() {
        let dir = Directory::new();
        assert_eq!(measure(&dir, &QueueName::new("nope")), None);
    }
}
