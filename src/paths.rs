use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

use crate::error::CacheError;

pub const RESULT_DB_PREFIX: &str = "result-db/";
pub const ORGANIZATION_MARKER: &str = "organization_uuid=";
pub const EXPERIMENT_MARKER: &str = "experiment_uuid=";

pub fn sanitize(path: &str) -> Result<String, CacheError> {
    if !path.starts_with(RESULT_DB_PREFIX) {
        return Err(CacheError::InvalidPath(path.to_string()));
    }

    // Only the first organization..experiment span is collapsed.
    let Some(org_start) = path.find(ORGANIZATION_MARKER) else {
        return Ok(path.to_string());
    };
    let Some(offset) = path[org_start..].find(EXPERIMENT_MARKER) else {
        return Ok(path.to_string());
    };
    let exp_start = org_start + offset;

    let mut sanitized = String::with_capacity(path.len() - (exp_start - org_start));
    sanitized.push_str(&path[..org_start]);
    sanitized.push_str(&path[exp_start..]);
    Ok(sanitized)
}

pub fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut parts: Vec<Utf8Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => match parts.last() {
                Some(Utf8Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Utf8Component::RootDir) | Some(Utf8Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.iter().map(|part| part.as_str()).collect()
}
