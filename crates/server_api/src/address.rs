use shared::{
    error::GatewayError,
    protocol::{Filter, Method, ResourceRequest},
};
use url::Url;

use crate::resources::ResourceConfig;

/// Which backend address shape a request resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addressing {
    /// `{resource}/{key}/`
    Instance { key: String },
    /// `{resource}/?{name}={value}`
    Filtered { filter: Filter },
    /// `{resource}/`
    Collection,
}

/// Picks the addressing mode for a request.
///
/// Creation always targets the collection. Otherwise a key wins over a
/// filter, and methods that modify a single instance are rejected without
/// a key. Empty keys and filter values count as absent.
pub fn resolve_addressing(request: &ResourceRequest) -> Result<Addressing, GatewayError> {
    let key = request.key.as_deref().filter(|key| !key.is_empty());
    let filter = request
        .filter
        .as_ref()
        .filter(|filter| !filter.name.is_empty() && !filter.value.is_empty());

    if request.method == Method::Post {
        return Ok(Addressing::Collection);
    }

    match (key, filter) {
        (Some(key), _) => Ok(Addressing::Instance {
            key: key.to_string(),
        }),
        (None, _) if request.method.requires_key() => Err(GatewayError::MissingKey {
            method: request.method,
        }),
        (None, Some(filter)) => Ok(Addressing::Filtered {
            filter: filter.clone(),
        }),
        (None, None) => Ok(Addressing::Collection),
    }
}

/// Builds the backend URL for `addressing` below `base`. Every address
/// ends with a trailing slash, as the backend routes expect.
pub(crate) fn target_url(
    base: &Url,
    resource: &ResourceConfig,
    addressing: &Addressing,
) -> Result<Url, GatewayError> {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    {
        let mut segments = url.path_segments_mut().map_err(|_| GatewayError::Internal)?;
        segments.pop_if_empty().extend(resource.path_segments());
        if let Addressing::Instance { key } = addressing {
            segments.push(key);
        }
        segments.push("");
    }
    if let Addressing::Filtered { filter } = addressing {
        url.query_pairs_mut()
            .append_pair(&filter.name, &filter.value);
    }
    Ok(url)
}
