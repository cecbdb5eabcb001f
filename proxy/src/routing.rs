use crate::errors::ProxyError;

const WORKLOADS_PATH: &str = "/workloads";
const TAGS_SEGMENT: &str = "tags";

/// Where an authenticated request is routed, derived from its path.
#[derive(Debug, PartialEq, Eq)]
pub enum RouteTarget {
    /// `GET /workloads`: the tenant's workload list.
    Workloads,
    /// `/tags/{tag}[/rest]`: the least busy node carrying `tag`.
    Tag { tag: String, rest: String },
    /// `/{index}[/rest]`: the running node at `index` in upstream order.
    Index { index: i64, rest: String },
}

impl RouteTarget {
    pub fn parse(path: &str) -> Result<Self, ProxyError> {
        if path == WORKLOADS_PATH {
            return Ok(RouteTarget::Workloads);
        }

        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let (first, remainder) = match trimmed.split_once('/') {
            Some((first, remainder)) => (first, Some(remainder)),
            None => (trimmed, None),
        };

        if first == TAGS_SEGMENT {
            let remainder = remainder.ok_or(ProxyError::MissingTag)?;
            let (tag, rest) = match remainder.split_once('/') {
                Some((tag, rest)) => (tag, Some(rest)),
                None => (remainder, None),
            };
            if tag.is_empty() {
                return Err(ProxyError::MissingTag);
            }
            return Ok(RouteTarget::Tag {
                tag: tag.to_string(),
                rest: downstream_path(rest),
            });
        }

        if first.is_empty() {
            return Err(ProxyError::InvalidPath);
        }

        let index = first.parse::<i64>().map_err(|_| ProxyError::InvalidIndex)?;
        Ok(RouteTarget::Index {
            index,
            rest: downstream_path(remainder),
        })
    }
}

fn downstream_path(rest: Option<&str>) -> String {
    format!("/{}", rest.unwrap_or_default())
}
