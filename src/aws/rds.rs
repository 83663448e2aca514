// RDS adapter: snapshot store and export task client for one region

use crate::clients::{
    CopySnapshotRequest, DbInstanceState, ExportClient, ExportRequest, ExportTaskStatus,
    SnapshotInfo, SnapshotPage, SnapshotState, SnapshotStore, StoreError,
};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_rds::error::DisplayErrorContext;
use aws_sdk_rds::types::DbSnapshot;
use aws_sdk_rds::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

const PAGE_SIZE: i32 = 100;

/// RDS client bound to a single region
#[derive(Clone)]
pub struct RdsClient {
    client: Client,
    region: String,
}

impl RdsClient {
    /// Client for `region` built from `config`.
    pub fn new(config: &SdkConfig, region: &str) -> Self {
        Self {
            client: Client::new(config),
            region: region.to_string(),
        }
    }

    fn snapshot_info(snapshot: &DbSnapshot) -> SnapshotInfo {
        SnapshotInfo {
            identifier: snapshot.db_snapshot_identifier().unwrap_or_default().to_string(),
            arn: snapshot.db_snapshot_arn().unwrap_or_default().to_string(),
            state: SnapshotState::from_status(snapshot.status().unwrap_or_default()),
            created_at: snapshot
                .snapshot_create_time()
                .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
        }
    }
}

fn service_error<E>(operation: &'static str, error: &E) -> StoreError
where
    E: std::error::Error,
{
    StoreError::service(operation, DisplayErrorContext(error).to_string())
}

#[async_trait]
impl SnapshotStore for RdsClient {
    fn region(&self) -> &str {
        &self.region
    }

    #[instrument(skip(self), fields(region = %self.region))]
    async fn describe_instance(&self, db_identifier: &str) -> Result<DbInstanceState, StoreError> {
        let output = self
            .client
            .describe_db_instances()
            .db_instance_identifier(db_identifier)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .map(|s| s.is_db_instance_not_found_fault())
                    .unwrap_or(false)
                {
                    StoreError::NotFound {
                        kind: "db instance",
                        id: db_identifier.to_string(),
                    }
                } else {
                    service_error("DescribeDBInstances", &e)
                }
            })?;

        let status = output
            .db_instances()
            .first()
            .and_then(|instance| instance.db_instance_status())
            .ok_or_else(|| StoreError::NotFound {
                kind: "db instance",
                id: db_identifier.to_string(),
            })?;
        debug!("Instance {} status: {}", db_identifier, status);
        Ok(DbInstanceState::from_status(status))
    }

    #[instrument(skip(self), fields(region = %self.region))]
    async fn create_snapshot(&self, db_identifier: &str, snapshot_id: &str) -> Result<(), StoreError> {
        self.client
            .create_db_snapshot()
            .db_instance_identifier(db_identifier)
            .db_snapshot_identifier(snapshot_id)
            .send()
            .await
            .map_err(|e| service_error("CreateDBSnapshot", &e))?;
        Ok(())
    }

    async fn describe_snapshot(&self, snapshot_id: &str) -> Result<Option<SnapshotInfo>, StoreError> {
        let output = match self
            .client
            .describe_db_snapshots()
            .db_snapshot_identifier(snapshot_id)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                if e.as_service_error()
                    .map(|s| s.is_db_snapshot_not_found_fault())
                    .unwrap_or(false)
                {
                    return Ok(None);
                }
                return Err(service_error("DescribeDBSnapshots", &e));
            }
        };

        Ok(output.db_snapshots().first().map(Self::snapshot_info))
    }

    async fn list_manual_snapshots(&self, marker: Option<String>) -> Result<SnapshotPage, StoreError> {
        let output = self
            .client
            .describe_db_snapshots()
            .snapshot_type("manual")
            .max_records(PAGE_SIZE)
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| service_error("DescribeDBSnapshots", &e))?;

        Ok(SnapshotPage {
            snapshots: output.db_snapshots().iter().map(Self::snapshot_info).collect(),
            next_marker: output.marker().filter(|m| !m.is_empty()).map(str::to_string),
        })
    }

    #[instrument(skip(self, request), fields(region = %self.region, target = %request.target_identifier))]
    async fn copy_snapshot(&self, request: &CopySnapshotRequest) -> Result<(), StoreError> {
        self.client
            .copy_db_snapshot()
            .source_db_snapshot_identifier(&request.source_arn)
            .target_db_snapshot_identifier(&request.target_identifier)
            .kms_key_id(&request.kms_key_arn)
            .copy_tags(request.copy_tags)
            .send()
            .await
            .map_err(|e| service_error("CopyDBSnapshot", &e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(region = %self.region))]
    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), StoreError> {
        self.client
            .delete_db_snapshot()
            .db_snapshot_identifier(snapshot_id)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .map(|s| s.is_db_snapshot_not_found_fault())
                    .unwrap_or(false)
                {
                    StoreError::NotFound {
                        kind: "snapshot",
                        id: snapshot_id.to_string(),
                    }
                } else {
                    service_error("DeleteDBSnapshot", &e)
                }
            })?;
        Ok(())
    }
}

#[async_trait]
impl ExportClient for RdsClient {
    #[instrument(skip(self, request), fields(region = %self.region, task = %request.task_identifier))]
    async fn start_export_task(&self, request: &ExportRequest) -> Result<(), StoreError> {
        self.client
            .start_export_task()
            .export_task_identifier(&request.task_identifier)
            .source_arn(&request.source_arn)
            .s3_bucket_name(&request.bucket)
            .iam_role_arn(&request.iam_role_arn)
            .kms_key_id(&request.kms_key_arn)
            .send()
            .await
            .map_err(|e| service_error("StartExportTask", &e))?;
        Ok(())
    }

    async fn describe_export_task(&self, task_identifier: &str) -> Result<Option<ExportTaskStatus>, StoreError> {
        let output = match self
            .client
            .describe_export_tasks()
            .export_task_identifier(task_identifier)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                if e.as_service_error()
                    .map(|s| s.is_export_task_not_found_fault())
                    .unwrap_or(false)
                {
                    return Ok(None);
                }
                return Err(service_error("DescribeExportTasks", &e));
            }
        };

        Ok(output.export_tasks().first().map(|task| {
            let mut status = ExportTaskStatus::new(task.status().unwrap_or_default());
            status.failure_cause = task.failure_cause().map(str::to_string);
            status
        }))
    }
}
