//! Deterministic service-account naming.
//!
//! Account ids are limited to 30 characters, so the application part is
//! elided in the middle and the model part is reduced to its last six
//! characters: `juju-gcp-<app ≤14>-<model[-6:]>`.

/// Prefix of every account id the broker creates.
pub const ACCOUNT_PREFIX: &str = "juju-gcp";

/// Provider limit on service-account ids.
pub const MAX_ACCOUNT_ID_LEN: usize = 30;

/// Maximum length of the application part of an account id.
pub const MAX_APP_LEN: usize = 14;

const ELISION_MARKER: &str = "--";
const MODEL_SUFFIX_LEN: usize = 6;

/// Shorten `s` to at most `max_len` characters by replacing its middle with `marker`.
///
/// Strings already within the limit are returned unchanged. When the kept
/// characters cannot be split evenly the tail gets the extra one.
pub fn elide(s: &str, max_len: usize, marker: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_len {
        return s.to_string();
    }
    let keep = max_len.saturating_sub(marker.chars().count());
    let head = keep / 2;
    let tail = keep - head;
    let mut out: String = chars[..head].iter().collect();
    out.push_str(marker);
    out.extend(&chars[chars.len() - tail..]);
    out
}

/// Account id for an application within a model.
pub fn service_account_name(model_uuid: &str, application_name: &str) -> String {
    let app = elide(&application_name.to_lowercase(), MAX_APP_LEN, ELISION_MARKER);
    let suffix: String = {
        let chars: Vec<char> = model_uuid.chars().collect();
        chars[chars.len().saturating_sub(MODEL_SUFFIX_LEN)..].iter().collect()
    };
    format!("{ACCOUNT_PREFIX}-{app}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "2b8c5d6e-1f3a-4c7b-9e0d-a1b2c3d4e5f6";

    #[test]
    fn short_names_unchanged() {
        assert_eq!(elide("worker", 14, "--"), "worker");
        assert_eq!(elide("exactly14chars", 14, "--"), "exactly14chars");
    }

    #[test]
    fn long_names_elided_in_middle() {
        let elided = elide("kubernetes-control-plane", 14, "--");
        assert_eq!(elided, "kubern---plane");
        assert_eq!(elided.len(), 14);
    }

    #[test]
    fn odd_split_favours_tail() {
        assert_eq!(elide("abcdefghij", 7, "..."), "ab...ij");
        assert_eq!(elide("abcdefghij", 8, "..."), "ab...hij");
    }

    #[test]
    fn account_name_shape() {
        let name = service_account_name(MODEL, "Kubernetes-Worker");
        assert_eq!(name, "juju-gcp-kubern--worker-d4e5f6");
        assert!(name.len() <= MAX_ACCOUNT_ID_LEN);
    }

    #[test]
    fn account_name_deterministic_and_bounded() {
        let long = "x".repeat(200);
        for app in ["a", "etcd", "kubernetes-control-plane", long.as_str()] {
            let first = service_account_name(MODEL, app);
            let second = service_account_name(MODEL, app);
            assert_eq!(first, second);
            assert!(first.chars().count() <= MAX_ACCOUNT_ID_LEN, "{first}");
        }
    }

    #[test]
    fn short_model_uuid_used_whole() {
        assert_eq!(service_account_name("abc", "etcd"), "juju-gcp-etcd-abc");
    }
}
