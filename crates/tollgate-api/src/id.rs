//! Deterministic resource identity.
//!
//! Every resource pushed to the gateway carries an ID derived from the
//! Kubernetes object it was translated from. IDs are a hash of a *composed
//! name* - the namespace, name, and rule/backend indices of the source object
//! joined with [SEPARATOR] - so re-translating the same object always produces
//! the same IDs and the gateway sees an upsert instead of a new resource.

use std::fmt::Write;

/// The separator between the parts of a composed name.
pub const SEPARATOR: char = '_';

// the gateway admin API accepts any string as an ID, but zero is the seed the
// IDs in existing deployments were generated with. don't change it.
const SEED: u64 = 0;

/// Join the parts of a composed name.
///
/// ```
/// # use tollgate_api::id::compose_name;
/// assert_eq!(compose_name(["default", "foo", "0"]), "default_foo_0");
/// ```
pub fn compose_name<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut buf = String::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            buf.push(SEPARATOR);
        }
        buf.push_str(part.as_ref());
    }
    buf
}

/// Generate a resource ID from a raw composed name.
///
/// IDs are the 16 character, zero-padded lowercase hex encoding of the XXH64
/// hash of the name.
pub fn gen_id(raw: &str) -> String {
    hex_digest(raw.as_bytes())
}

/// Compose a name from parts and hash it into an ID in one go.
pub fn gen_id_from<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    gen_id(&compose_name(parts))
}

/// Hex encode the XXH64 digest of some bytes.
pub fn hex_digest(bytes: &[u8]) -> String {
    let digest = xxhash_rust::xxh64::xxh64(bytes, SEED);
    let mut buf = String::with_capacity(16);
    let _ = write!(&mut buf, "{digest:016x}");
    buf
}
