//! Input guards shared by route handlers.

use uuid::Uuid;

use crate::errors::AppError;

/// Parses a UUID-shaped path or query parameter, rejecting anything malformed.
/// Only the canonical hyphenated form is accepted.
pub fn parse_uuid_param(name: &str, raw: &str) -> Result<Uuid, AppError> {
    let raw = raw.trim();
    if raw.len() != 36 {
        return Err(AppError::Validation(format!("{name} must be a valid UUID")));
    }
    Uuid::parse_str(raw).map_err(|_| AppError::Validation(format!("{name} must be a valid UUID")))
}

/// Returns `path` if it is a safe same-origin relative path, otherwise `/`.
///
/// Rejects protocol-relative (`//host`), backslash (`/\host`), absolute URLs and
/// anything carrying control characters.
pub fn safe_redirect_path(path: Option<&str>) -> String {
    let Some(path) = path.map(str::trim) else {
        return "/".to_string();
    };
    let is_safe = path.starts_with('/')
        && !path.starts_with("//")
        && !path.contains('\\')
        && !path.contains("://")
        && !path.chars().any(|c| c.is_control());
    if is_safe {
        path.to_string()
    } else {
        "/".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid_param_accepts_canonical() {
        let id = Uuid::new_v4();
        assert_eq!(parse_uuid_param("id", &id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_parse_uuid_param_rejects_malformed() {
        for raw in [
            "",
            "abc",
            "123e4567-e89b-12d3-a456-42661417400",
            "123e4567e89b12d3a456426614174000",
            "123e4567-e89b-12d3-a456-42661417400g",
            "../../etc/passwd",
        ] {
            let err = parse_uuid_param("id", raw).unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "accepted {raw:?}");
        }
    }

    #[test]
    fn test_safe_redirect_keeps_relative_paths() {
        assert_eq!(safe_redirect_path(Some("/dashboard")), "/dashboard");
        assert_eq!(
            safe_redirect_path(Some("/itineraries/42?tab=plan")),
            "/itineraries/42?tab=plan"
        );
    }

    #[test]
    fn test_safe_redirect_blocks_open_redirects() {
        for target in [
            "//evil.com",
            "/\\evil.com",
            "https://evil.com",
            "evil.com",
            "/redirect?to=https://evil.com",
            "/ok\r\nSet-Cookie: x=y",
        ] {
            assert_eq!(safe_redirect_path(Some(target)), "/", "allowed {target:?}");
        }
        assert_eq!(safe_redirect_path(None), "/");
    }
}
