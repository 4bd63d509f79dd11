//! Route priority.
//!
//! Overlapping HTTP matches are ordered by a single integer priority built
//! from disjoint bit ranges, most specific signal first. The layout is frozen:
//! gateways that already hold routes compare priorities computed with it, so
//! changing a width or shift reorders live traffic.
//!
//! | bits  | width | field                                        |
//! |-------|-------|----------------------------------------------|
//! | 47    | 1     | hostname is precise (not a wildcard)         |
//! | 39-46 | 8     | hostname length                              |
//! | 37-38 | 2     | path kind: 3 exact, 2 prefix, 1 regex, 0 none|
//! | 27-36 | 10    | path length                                  |
//! | 26    | 1     | a method is matched                          |
//! | 21-25 | 5     | number of header matches                     |
//! | 16-20 | 5     | number of query parameter matches            |
//! | 0-15  | 16    | `0xFFFF - rule index`                        |
//!
//! Every field saturates at its maximum. The highest bit used is 47, so a
//! priority always fits in the 53 bits a JSON number can carry exactly.

const HOST_PRECISE_SHIFT: u32 = 47;
const HOST_LEN_SHIFT: u32 = 39;
const HOST_LEN_MAX: u64 = 0xFF;
const PATH_KIND_SHIFT: u32 = 37;
const PATH_LEN_SHIFT: u32 = 27;
const PATH_LEN_MAX: u64 = 0x3FF;
const METHOD_SHIFT: u32 = 26;
const HEADERS_SHIFT: u32 = 21;
const QUERY_SHIFT: u32 = 16;
const COUNT_MAX: u64 = 0x1F;
const RULE_INDEX_MAX: u64 = 0xFFFF;

/// How a route matches on path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum PathKind {
    #[default]
    None = 0,
    Regex = 1,
    Prefix = 2,
    Exact = 3,
}

/// Everything about a single match that contributes to its priority.
#[derive(Debug, Clone, Default)]
pub struct MatchShape<'a> {
    pub hostnames: &'a [String],
    pub path_kind: PathKind,
    pub path: &'a str,
    pub method: bool,
    pub headers: usize,
    pub query_params: usize,
    pub rule_index: usize,
}

/// Compute the priority of a match.
///
/// A match with several hostnames gets the priority of its most specific
/// hostname.
pub fn priority(shape: &MatchShape) -> i64 {
    let host_bits = shape
        .hostnames
        .iter()
        .map(|h| hostname_bits(h))
        .max()
        .unwrap_or(0);

    let path_len = if shape.path_kind == PathKind::None {
        0
    } else {
        (shape.path.len() as u64).min(PATH_LEN_MAX)
    };

    let rule_index = (shape.rule_index as u64).min(RULE_INDEX_MAX);

    let bits = host_bits
        | (shape.path_kind as u64) << PATH_KIND_SHIFT
        | path_len << PATH_LEN_SHIFT
        | (shape.method as u64) << METHOD_SHIFT
        | (shape.headers as u64).min(COUNT_MAX) << HEADERS_SHIFT
        | (shape.query_params as u64).min(COUNT_MAX) << QUERY_SHIFT
        | (RULE_INDEX_MAX - rule_index);

    bits as i64
}

fn hostname_bits(hostname: &str) -> u64 {
    let precise = !hostname.starts_with('*') as u64;
    let len = (hostname.len() as u64).min(HOST_LEN_MAX);
    precise << HOST_PRECISE_SHIFT | len << HOST_LEN_SHIFT
}

#[cfg(test)]
mod test {
    use super::*;

    fn exact(path: &str) -> MatchShape {
        MatchShape {
            path_kind: PathKind::Exact,
            path,
            ..Default::default()
        }
    }

    #[test]
    fn test_longer_exact_path_wins() {
        assert!(priority(&exact("/foo/bar")) > priority(&exact("/foo")));
        assert!(priority(&exact("/a")) > priority(&exact("/")));
    }

    #[test]
    fn test_field_order() {
        let hosts = vec!["api.example.com".to_string()];
        let wildcard = vec!["*.example.com".to_string()];

        // a precise host beats a wildcard with the same length path
        let precise = MatchShape {
            hostnames: &hosts,
            ..exact("/")
        };
        let wild = MatchShape {
            hostnames: &wildcard,
            ..exact("/")
        };
        assert!(priority(&precise) > priority(&wild));

        // any exact path beats a much longer prefix
        let long_prefix = MatchShape {
            path_kind: PathKind::Prefix,
            path: "/a/very/long/prefix/path",
            ..Default::default()
        };
        assert!(priority(&exact("/a")) > priority(&long_prefix));

        // with equal paths, a method match beats any number of headers
        let method = MatchShape {
            method: true,
            ..exact("/a")
        };
        let headers = MatchShape {
            headers: 31,
            query_params: 31,
            ..exact("/a")
        };
        assert!(priority(&method) > priority(&headers));

        // everything else equal, earlier rules win
        let first = MatchShape {
            rule_index: 0,
            ..exact("/a")
        };
        let second = MatchShape {
            rule_index: 1,
            ..exact("/a")
        };
        assert!(priority(&first) > priority(&second));
    }

    #[test]
    fn test_layout() {
        let hosts = vec!["ab".to_string()];
        let shape = MatchShape {
            hostnames: &hosts,
            path_kind: PathKind::Prefix,
            path: "/abc",
            method: true,
            headers: 2,
            query_params: 1,
            rule_index: 3,
        };

        let expected: i64 = 1 << 47 | 2 << 39 | 2 << 37 | 4 << 27 | 1 << 26 | 2 << 21 | 1 << 16 | 0xFFFC;
        assert_eq!(priority(&shape), expected);
    }

    #[test]
    fn test_saturates_below_2_53() {
        let host = "h".repeat(1000);
        let hosts = vec![host];
        let path = "/".repeat(5000);
        let shape = MatchShape {
            hostnames: &hosts,
            path_kind: PathKind::Exact,
            path: &path,
            method: true,
            headers: 100,
            query_params: 100,
            rule_index: 0,
        };

        let p = priority(&shape);
        assert_eq!(p, (1i64 << 48) - 1);
        assert!(p < 1 << 53);

        let last = MatchShape {
            rule_index: 1_000_000,
            ..exact("/")
        };
        assert_eq!(priority(&last) & 0xFFFF, 0);
    }
}
