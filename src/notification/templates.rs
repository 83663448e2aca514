// Email templates for run notifications

use super::{NotifyError, RunStatus};
use crate::backup::BackupResult;
use handlebars::Handlebars;
use serde_json::{json, Value};

/// Rendered notification email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    /// Subject line
    pub subject: String,
    /// HTML document sent as the message body
    pub html_body: String,
}

const SUCCESS_SUBJECT: &str = "RDS Backup Successful";
const FAILURE_SUBJECT: &str = "RDS Backup Failed";

const SUCCESS_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif;">
    <h2>{{subject}}</h2>
    <p>The RDS backup has been completed successfully.</p>
    <ul>
        <li><strong>Database:</strong> {{db_identifier}}</li>
        <li><strong>Snapshot ID:</strong> {{snapshot_id}}</li>
        <li><strong>Target Snapshot ID:</strong> {{target_snapshot_id}}</li>
        <li><strong>Backup Time:</strong> {{backup_time}}</li>
        {{#each locations}}
        <li><strong>S3 Location:</strong> {{this}}</li>
        {{/each}}
    </ul>
    <p>This is an automated message. Please do not reply.</p>
</body>
</html>"#;

const FAILURE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif;">
    <h2 style="color: #ff0000;">{{subject}}</h2>
    <p>The RDS backup operation has encountered an error.</p>
    <ul>
        <li><strong>Database:</strong> {{db_identifier}}</li>
        <li><strong>Attempted Snapshot ID:</strong> {{snapshot_id}}</li>
        <li><strong>Error Time:</strong> {{backup_time}}</li>
        <li><strong>Error Message:</strong> {{error_message}}</li>
    </ul>
    <p>Please check the AWS console and logs for more details.</p>
    <p>This is an automated message. Please do not reply.</p>
</body>
</html>"#;

/// Compiled success and failure templates.
///
/// Every `{{field}}` is HTML-escaped on render.
pub struct EmailTemplates {
    handlebars: Handlebars<'static>,
}

impl EmailTemplates {
    /// Compile both templates.
    pub fn new() -> Result<Self, NotifyError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars
            .register_template_string("success", SUCCESS_TEMPLATE)
            .map_err(|e| NotifyError::Build(e.to_string()))?;
        handlebars
            .register_template_string("failure", FAILURE_TEMPLATE)
            .map_err(|e| NotifyError::Build(e.to_string()))?;
        Ok(Self { handlebars })
    }

    /// Render the success or failure email for `result`.
    pub fn render(&self, result: &BackupResult, status: RunStatus) -> Result<EmailMessage, NotifyError> {
        let (name, subject) = match status {
            RunStatus::Succeeded => ("success", SUCCESS_SUBJECT),
            RunStatus::Failed => ("failure", FAILURE_SUBJECT),
        };
        let html_body = self
            .handlebars
            .render(name, &view(result, subject))
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        Ok(EmailMessage {
            subject: subject.to_string(),
            html_body,
        })
    }
}

fn view(result: &BackupResult, subject: &str) -> Value {
    json!({
        "subject": subject,
        "db_identifier": result.db_identifier,
        "snapshot_id": result.snapshot_id.as_deref().unwrap_or(""),
        "target_snapshot_id": result.target_snapshot_id.as_deref().unwrap_or(""),
        "backup_time": result.backup_time_rfc3339(),
        "error_message": result.error_message.as_deref().unwrap_or(""),
        "locations": result.location_uris(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{Side, StorageLocation};
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    fn result() -> BackupResult {
        let mut result = BackupResult::new("orders-db", DateTime::<Utc>::UNIX_EPOCH);
        result.snapshot_id = Some("backup-orders-db-1970-01-01-00-00-00".into());
        result
    }

    #[test]
    fn test_success_lists_every_location() {
        let mut result = result();
        for (side, bucket) in [(Side::Source, "src"), (Side::Target, "dst")] {
            result.record_location(StorageLocation {
                side,
                region: "r".into(),
                bucket: bucket.into(),
                export_task_id: "export-x".into(),
            });
        }

        let email = EmailTemplates::new()
            .unwrap()
            .render(&result, RunStatus::Succeeded)
            .unwrap();

        assert_eq!(email.subject, "RDS Backup Successful");
        assert_eq!(email.html_body.matches("S3 Location").count(), 2);
        assert!(email.html_body.contains("s3://src/export-x"));
        assert!(email.html_body.contains("s3://dst/export-x"));
        assert!(email.html_body.contains("1970-01-01T00:00:00Z"));
    }

    #[test]
    fn test_success_without_exports_has_no_location_lines() {
        let email = EmailTemplates::new()
            .unwrap()
            .render(&result(), RunStatus::Succeeded)
            .unwrap();

        assert!(!email.html_body.contains("S3 Location"));
        assert!(email.html_body.contains("backup-orders-db-1970-01-01-00-00-00"));
    }

    #[test]
    fn test_failure_escapes_error_message() {
        let mut result = result();
        result.error_message = Some("export task failed: <disk full> & more".into());

        let email = EmailTemplates::new()
            .unwrap()
            .render(&result, RunStatus::Failed)
            .unwrap();

        assert_eq!(email.subject, "RDS Backup Failed");
        assert!(email
            .html_body
            .contains("export task failed: &lt;disk full&gt; &amp; more"));
        assert!(!email.html_body.contains("<disk full>"));
    }
}
