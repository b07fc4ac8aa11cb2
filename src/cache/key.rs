//! Cache Key Canonicalizer — turns a request (plus the matched route's vary
//! headers) into a stable, order-independent digest so that header or query
//! param ordering never causes spurious misses.

use sha2::{Digest, Sha256};

const FIELD_SEP: u8 = 0x1f;

/// Inputs to the canonical cache key, already pulled out of the request by
/// the pipeline so this module has no HTTP-layer dependency.
pub struct KeyInput<'a> {
    pub method: &'a str,
    pub tenant_id: &'a str,
    pub route_name: &'a str,
    pub path: &'a str,
    pub query: &'a [(String, String)],
    /// Header name/value pairs already filtered down to the route's
    /// `vary_headers` list, in the order that list was declared.
    pub vary: &'a [(String, String)],
}

/// Builds the `cache:<hex>` key for a request.
pub fn canonicalize(input: &KeyInput<'_>) -> String {
    format!("cache:{}", digest_hex(input))
}

/// Builds the `neg:<hex>` key for the same request — negative entries and
/// positive entries share a canonicalization so a later successful fetch
/// correctly overwrites a prior 404/410 record.
pub fn canonicalize_negative(input: &KeyInput<'_>) -> String {
    format!("neg:{}", digest_hex(input))
}

fn digest_hex(input: &KeyInput<'_>) -> String {
    let mut query_sorted: Vec<&(String, String)> = input.query.iter().collect();
    query_sorted.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let mut hasher = Sha256::new();
    hasher.update(input.method.as_bytes());
    hasher.update([FIELD_SEP]);
    hasher.update(input.tenant_id.as_bytes());
    hasher.update([FIELD_SEP]);
    hasher.update(input.route_name.as_bytes());
    hasher.update([FIELD_SEP]);
    hasher.update(input.path.as_bytes());
    hasher.update([FIELD_SEP]);
    for (k, v) in &query_sorted {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update([FIELD_SEP]);
    }
    hasher.update([FIELD_SEP]);
    for (name, value) in input.vary {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update([FIELD_SEP]);
    }

    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Minimal hex encoder to avoid pulling in a whole crate for one call site.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            let _ = write!(s, "{b:02x}");
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(query: &'a [(String, String)], vary: &'a [(String, String)]) -> KeyInput<'a> {
        KeyInput {
            method: "GET",
            tenant_id: "tenant-1",
            route_name: "billing",
            path: "/v1/invoices",
            query,
            vary,
        }
    }

    #[test]
    fn query_param_order_does_not_change_the_key() {
        let a = vec![("b".into(), "2".into()), ("a".into(), "1".into())];
        let b = vec![("a".into(), "1".into()), ("b".into(), "2".into())];
        assert_eq!(canonicalize(&input(&a, &[])), canonicalize(&input(&b, &[])));
    }

    #[test]
    fn different_vary_header_values_change_the_key() {
        let v1 = vec![("accept-language".into(), "en".into())];
        let v2 = vec![("accept-language".into(), "fr".into())];
        assert_ne!(canonicalize(&input(&[], &v1)), canonicalize(&input(&[], &v2)));
    }

    #[test]
    fn positive_and_negative_keys_share_a_digest() {
        let i = input(&[], &[]);
        let pos = canonicalize(&i);
        let neg = canonicalize_negative(&i);
        assert_eq!(&pos[6..], &neg[4..]);
    }

    proptest::proptest! {
        /// Shuffling query params (or vary pairs) around never changes the
        /// digest: only the sorted multiset of pairs feeds the hash.
        #[test]
        fn permuting_query_params_does_not_change_the_key(
            mut pairs in proptest::collection::vec((proptest::string::string_regex("[a-z]{1,6}").unwrap(), proptest::string::string_regex("[a-z0-9]{0,6}").unwrap()), 0..8),
            seed in 0u64..10_000,
        ) {
            let a = canonicalize(&input(&pairs, &[]));
            // Deterministic "shuffle": rotate the vector by `seed`.
            if !pairs.is_empty() {
                let mid = (seed as usize) % pairs.len();
                pairs.rotate_left(mid);
            }
            let b = canonicalize(&input(&pairs, &[]));
            proptest::prop_assert_eq!(a, b);
        }

        /// Any single changed query value changes the key, as long as it
        /// isn't masked by a duplicate key earlier in the list.
        #[test]
        fn changing_a_query_value_changes_the_key(
            key in proptest::string::string_regex("[a-z]{1,6}").unwrap(),
            v1 in proptest::string::string_regex("[a-z0-9]{1,6}").unwrap(),
            v2 in proptest::string::string_regex("[a-z0-9]{1,6}").unwrap(),
        ) {
            proptest::prop_assume!(v1 != v2);
            let a = canonicalize(&input(&[(key.clone(), v1)], &[]));
            let b = canonicalize(&input(&[(key, v2)], &[]));
            proptest::prop_assert_ne!(a, b);
        }
    }
}
