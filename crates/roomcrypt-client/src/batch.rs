//! Splitting a key-share delta into transport batches.

use roomcrypt_proto::DeviceKey;

/// Split `devices` into batches of at most `cap` devices.
///
/// `devices` must be sorted by user (a `BTreeSet<DeviceKey>` iterates that
/// way). A user's devices stay in one batch unless that user alone has more
/// than `cap`, in which case they get batches of their own split at `cap`.
pub(crate) fn split_batches(devices: &[DeviceKey], cap: usize) -> Vec<Vec<DeviceKey>> {
    let cap = cap.max(1);
    let mut batches = Vec::new();
    let mut current: Vec<DeviceKey> = Vec::new();

    for user_devices in devices.chunk_by(|a, b| a.user_id == b.user_id) {
        if user_devices.len() > cap {
            if !current.is_empty() {
                batches.push(std::mem::take(&mut current));
            }
            batches.extend(user_devices.chunks(cap).map(<[DeviceKey]>::to_vec));
            continue;
        }

        if current.len() + user_devices.len() > cap {
            batches.push(std::mem::take(&mut current));
        }
        current.extend_from_slice(user_devices);
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices(user: &str, count: usize) -> Vec<DeviceKey> {
        (0..count).map(|i| DeviceKey::new(user, format!("D{i:03}"))).collect()
    }

    #[test]
    fn empty_delta_has_no_batches() {
        assert!(split_batches(&[], 100).is_empty());
    }

    #[test]
    fn users_are_not_split_across_batches() {
        let mut all = devices("@a:x", 3);
        all.extend(devices("@b:x", 3));
        all.extend(devices("@c:x", 2));

        let batches = split_batches(&all, 5);

        let sizes: Vec<_> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, [3, 5]);
        assert!(batches[1].iter().any(|d| d.user_id.as_str() == "@b:x"));
        assert!(batches[1].iter().any(|d| d.user_id.as_str() == "@c:x"));
    }

    #[test]
    fn oversized_user_split_at_cap() {
        let mut all = devices("@a:x", 1);
        all.extend(devices("@big:x", 7));
        all.extend(devices("@z:x", 1));

        let batches = split_batches(&all, 3);

        let sizes: Vec<_> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, [1, 3, 3, 1, 1]);
        assert!(batches.iter().all(|b| b.len() <= 3));
    }
}
