/*!
 * Raw Key Composition
 *
 * Caller-supplied identifiers may contain any separator, so every part is
 * written as `<byte length>:<bytes>`. Two different part lists never
 * produce the same raw key.
 */

use std::fmt::Write;

/// Append one length-prefixed part
#[inline]
pub fn push_key_part(out: &mut String, part: &str) {
    let _ = write!(out, "{}:{}", part.len(), part);
}

/// `namespace` followed by each part, length-prefixed
pub fn compose_key(namespace: &str, parts: &[&str]) -> String {
    let mut key = String::from(namespace);
    for part in parts {
        key.push('|');
        push_key_part(&mut key, part);
    }
    key
}
