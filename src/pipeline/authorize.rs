use crate::error::{Result, SignError};
use crate::request::{RequestStatus, Role, SigningRequest, User};

/// Role check repeated at execution time, independent of whatever the API
/// layer checked when the job was enqueued.
///
/// Officers sign requests sent to them; readers sign only requests delegated
/// back to them. A request already `InProcess` (a redelivered job) is judged
/// by the path it took: delegated if `delegated_to` is set.
pub fn authorize(user: &User, request: &SigningRequest) -> Result<()> {
    let effective = match request.status {
        RequestStatus::InProcess if request.delegated_to.is_some() => RequestStatus::Delegated,
        RequestStatus::InProcess => RequestStatus::ReadyForSignature,
        status => status,
    };

    match user.role {
        Role::Officer if effective == RequestStatus::Delegated => Err(SignError::Unauthorized(
            "officer cannot sign delegated requests".to_string(),
        )),
        Role::Officer if request.created_by == user.id => Err(SignError::Unauthorized(
            "signer created this request".to_string(),
        )),
        Role::Officer => Ok(()),
        Role::Reader if effective != RequestStatus::Delegated => Err(SignError::Unauthorized(
            "reader can only sign delegated requests".to_string(),
        )),
        Role::Reader if request.delegated_to.as_deref() != Some(user.id.as_str()) => Err(
            SignError::Unauthorized("request is delegated to another user".to_string()),
        ),
        Role::Reader => Ok(()),
        Role::Admin => Err(SignError::Unauthorized(format!(
            "role {} may not sign documents",
            user.role
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, role: Role) -> User {
        User {
            id: id.to_string(),
            name: String::new(),
            role,
        }
    }

    fn request(status: RequestStatus, delegated_to: Option<&str>) -> SigningRequest {
        let mut r = SigningRequest::new("r1", "t.html", "reader-1");
        r.status = status;
        r.delegated_to = delegated_to.map(str::to_string);
        r
    }

    #[test]
    fn officer_signs_ready_requests_only() {
        let officer = user("officer-1", Role::Officer);
        assert!(authorize(&officer, &request(RequestStatus::ReadyForSignature, None)).is_ok());
        assert!(authorize(&officer, &request(RequestStatus::Delegated, Some("reader-1"))).is_err());
    }

    #[test]
    fn reader_signs_own_delegated_requests_only() {
        let reader = user("reader-1", Role::Reader);
        assert!(authorize(&reader, &request(RequestStatus::Delegated, Some("reader-1"))).is_ok());
        assert!(authorize(&reader, &request(RequestStatus::ReadyForSignature, None)).is_err());

        let other = user("reader-2", Role::Reader);
        assert!(authorize(&other, &request(RequestStatus::Delegated, Some("reader-1"))).is_err());
    }

    #[test]
    fn in_process_requests_keep_their_signing_path() {
        let officer = user("officer-1", Role::Officer);
        let reader = user("reader-1", Role::Reader);

        let officer_path = request(RequestStatus::InProcess, None);
        assert!(authorize(&officer, &officer_path).is_ok());
        assert!(authorize(&reader, &officer_path).is_err());

        let reader_path = request(RequestStatus::InProcess, Some("reader-1"));
        assert!(authorize(&reader, &reader_path).is_ok());
        assert!(authorize(&officer, &reader_path).is_err());
    }

    #[test]
    fn other_roles_are_rejected() {
        let admin = user("admin-1", Role::Admin);
        let err = authorize(&admin, &request(RequestStatus::ReadyForSignature, None)).unwrap_err();
        assert!(matches!(err, SignError::Unauthorized(_)));
    }
}
