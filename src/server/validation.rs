use crate::server::response::ApiError;

const MAX_OWNER_NAME_LEN: usize = 39;
const MAX_REPO_NAME_LEN: usize = 100;

fn is_valid_name_char(c: char, allow_period: bool) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || (allow_period && c == '.')
}

fn validate_name(name: &str, entity: &str, max_len: usize, allow_period: bool) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{entity} name cannot be empty"));
    }
    if name.len() > max_len {
        return Err(format!("{entity} name cannot exceed {max_len} characters"));
    }
    if !name.chars().all(|c| is_valid_name_char(c, allow_period)) {
        let mut allowed = "alphanumeric characters, hyphens, and underscores".to_string();
        if allow_period {
            allowed.push_str(", and periods");
        }
        return Err(format!("{entity} name can only contain {allowed}"));
    }
    Ok(())
}

/// Validates the `{owner}/{name}` pair and returns the full name.
pub fn validate_full_name(owner: &str, name: &str) -> Result<String, ApiError> {
    validate_name(owner, "Owner", MAX_OWNER_NAME_LEN, false).map_err(ApiError::bad_request)?;
    validate_name(name, "Repository", MAX_REPO_NAME_LEN, true).map_err(ApiError::bad_request)?;
    if name == "." || name == ".." {
        return Err(ApiError::bad_request("Repository name is reserved"));
    }
    Ok(format!("{owner}/{name}"))
}

pub fn validate_sha(sha: &str) -> Result<(), ApiError> {
    if !(4..=40).contains(&sha.len()) || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ApiError::bad_request("Commit sha must be 4 to 40 hex characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name() {
        assert_eq!(validate_full_name("acme", "web.site").unwrap(), "acme/web.site");
        assert!(validate_full_name("ac.me", "shop").is_err());
        assert!(validate_full_name("acme", "").is_err());
        assert!(validate_full_name("acme", "..").is_err());
    }

    #[test]
    fn test_sha() {
        assert!(validate_sha("abc123").is_ok());
        assert!(validate_sha("xyz").is_err());
        assert!(validate_sha(&"a".repeat(41)).is_err());
    }
}
