use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::api::{BusinessObject, ObjectKey};

/// Last successfully processed version of every object of one kind. Quota
/// deltas and UID changes are computed against it.
///
/// The lock is only held for map access.
pub struct ObjectCache<K> {
    objects: Mutex<HashMap<ObjectKey, K>>,
}

impl<K: BusinessObject> Default for ObjectCache<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: BusinessObject> ObjectCache<K> {
    fn lock(&self) -> MutexGuard<'_, HashMap<ObjectKey, K>> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &ObjectKey) -> Option<K> {
        self.lock().get(key).cloned()
    }

    pub fn get_or_create(&self, key: &ObjectKey, obj: &K) -> K {
        self.lock().entry(key.clone()).or_insert_with(|| obj.clone()).clone()
    }

    pub fn set(&self, key: ObjectKey, obj: K) {
        self.lock().insert(key, obj);
    }

    pub fn delete(&self, key: &ObjectKey) -> Option<K> {
        self.lock().remove(key)
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1::platform::{Platform, PlatformSpec};

    #[test]
    fn get_or_create_keeps_the_first_value() {
        let cache = ObjectCache::<Platform>::default();
        let key = ObjectKey::cluster("p1");
        let first = Platform::new(
            "p1",
            PlatformSpec {
                tenant_id: "t1".into(),
                name: "p1".into(),
                administrators: vec!["alice".into()],
            },
        );
        let mut second = first.clone();
        second.spec.administrators.clear();

        cache.get_or_create(&key, &first);
        let got = cache.get_or_create(&key, &second);
        assert_eq!(got.spec.administrators, vec!["alice".to_string()]);

        assert!(cache.delete(&key).is_some());
        assert!(cache.is_empty());
    }
}
