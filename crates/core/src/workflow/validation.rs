//! Input validation for workflow operations. Every violated field is
//! collected and reported together rather than short-circuiting on the
//! first failure.

use crate::errors::FieldViolation;

use super::{CreateRequest, ReviewRequest};

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;
pub const MAX_ACTOR_FIELD_CHARS: usize = 100;
pub const MAX_COMMENT_CHARS: usize = 500;

pub fn validate_create(input: &CreateRequest) -> Vec<FieldViolation> {
    let mut violations = Vec::new();

    check_required(&mut violations, "title", "Title", &input.title, MAX_TITLE_CHARS);
    check_required(
        &mut violations,
        "description",
        "Description",
        &input.description,
        MAX_DESCRIPTION_CHARS,
    );
    check_required(
        &mut violations,
        "requesterId",
        "Requester ID",
        &input.requester_id,
        MAX_ACTOR_FIELD_CHARS,
    );
    check_required(
        &mut violations,
        "requesterName",
        "Requester name",
        &input.requester_name,
        MAX_ACTOR_FIELD_CHARS,
    );

    violations
}

pub fn validate_review(input: &ReviewRequest) -> Vec<FieldViolation> {
    let mut violations = Vec::new();

    check_required(
        &mut violations,
        "reviewerId",
        "Reviewer ID",
        &input.reviewer_id,
        MAX_ACTOR_FIELD_CHARS,
    );
    check_required(
        &mut violations,
        "reviewerName",
        "Reviewer name",
        &input.reviewer_name,
        MAX_ACTOR_FIELD_CHARS,
    );

    if let Some(comments) = &input.comments {
        if comments.chars().count() > MAX_COMMENT_CHARS {
            violations.push(FieldViolation::new(
                "comments",
                format!("Comments cannot exceed {MAX_COMMENT_CHARS} characters"),
            ));
        }
    }

    violations
}

fn check_required(
    violations: &mut Vec<FieldViolation>,
    field: &'static str,
    label: &str,
    value: &str,
    max_chars: usize,
) {
    if value.trim().is_empty() {
        violations.push(FieldViolation::new(field, format!("{label} is required")));
    } else if value.chars().count() > max_chars {
        violations.push(FieldViolation::new(
            field,
            format!("{label} cannot exceed {max_chars} characters"),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::{validate_create, validate_review, MAX_COMMENT_CHARS, MAX_TITLE_CHARS};
    use crate::domain::approval::RequestId;
    use crate::workflow::{CreateRequest, ReviewRequest};

    fn valid_create() -> CreateRequest {
        CreateRequest {
            title: "Expense report".to_string(),
            description: "Q3 travel".to_string(),
            requester_id: "u1".to_string(),
            requester_name: "Alice".to_string(),
        }
    }

    #[test]
    fn valid_create_input_has_no_violations() {
        assert!(validate_create(&valid_create()).is_empty());
    }

    #[test]
    fn empty_create_input_reports_all_four_fields() {
        let input = CreateRequest {
            title: String::new(),
            description: "  ".to_string(),
            requester_id: String::new(),
            requester_name: String::new(),
        };

        let violations = validate_create(&input);
        let fields: Vec<&str> = violations.iter().map(|violation| violation.field).collect();
        assert_eq!(fields, vec!["title", "description", "requesterId", "requesterName"]);
    }

    #[test]
    fn over_length_title_is_rejected() {
        let mut input = valid_create();
        input.title = "x".repeat(MAX_TITLE_CHARS + 1);

        let violations = validate_create(&input);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "title");
        assert!(violations[0].message.contains("200"));
    }

    #[test]
    fn title_at_limit_is_accepted() {
        let mut input = valid_create();
        input.title = "x".repeat(MAX_TITLE_CHARS);
        assert!(validate_create(&input).is_empty());
    }

    #[test]
    fn limits_count_characters_not_bytes() {
        let mut input = valid_create();
        // 200 multi-byte characters, well over 200 bytes.
        input.title = "é".repeat(MAX_TITLE_CHARS);
        assert!(validate_create(&input).is_empty());
    }

    #[test]
    fn review_without_comments_skips_comment_check() {
        let input = ReviewRequest {
            request_id: RequestId("r-1".to_string()),
            approved: true,
            reviewer_id: "u2".to_string(),
            reviewer_name: "Bob".to_string(),
            comments: None,
        };
        assert!(validate_review(&input).is_empty());
    }

    #[test]
    fn review_violations_cover_reviewer_fields_and_comments() {
        let input = ReviewRequest {
            request_id: RequestId("r-1".to_string()),
            approved: false,
            reviewer_id: String::new(),
            reviewer_name: "y".repeat(101),
            comments: Some("c".repeat(MAX_COMMENT_CHARS + 1)),
        };

        let violations = validate_review(&input);
        let fields: Vec<&str> = violations.iter().map(|violation| violation.field).collect();
        assert_eq!(fields, vec!["reviewerId", "reviewerName", "comments"]);
    }
}
