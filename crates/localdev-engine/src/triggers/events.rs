//! Canonical example events, returned when a trigger route is poked
//! without a payload of its own.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

pub const EXAMPLE_ACCOUNT: &str = "123456789012";
pub const EXAMPLE_REGION: &str = "us-east-1";

pub fn schedule_event(now: DateTime<Utc>) -> Value {
    json!({
        "account": EXAMPLE_ACCOUNT,
        "region": EXAMPLE_REGION,
        "detail": {},
        "detail-type": "Scheduled Event",
        "source": "aws.events",
        "time": now.to_rfc3339_opts(SecondsFormat::Millis, true),
        "id": "cdc73f9d-aea9-11e3-9d5a-835b769c0d9c",
        "resources": [
            format!("arn:aws:events:{EXAMPLE_REGION}:{EXAMPLE_ACCOUNT}:rule/my-schedule")
        ],
    })
}

fn s3_record(event_name: &str, object: Value) -> Value {
    json!({
        "Records": [{
            "eventVersion": "2.0",
            "eventSource": "aws:s3",
            "awsRegion": "us-west-2",
            "eventTime": "1970-01-01T00:00:00.000Z",
            "eventName": event_name,
            "userIdentity": { "principalId": "EXAMPLE" },
            "requestParameters": { "sourceIPAddress": "127.0.0.1" },
            "responseElements": {
                "x-amz-request-id": "EXAMPLE123456789",
                "x-amz-id-2": "EXAMPLE123/5678abcdefghijklambdaisawesome/mnopqrstuvwxyzABCDEFGH"
            },
            "s3": {
                "s3SchemaVersion": "1.0",
                "configurationId": "testConfigRule",
                "bucket": {
                    "name": "example-bucket",
                    "ownerIdentity": { "principalId": "EXAMPLE" },
                    "arn": "arn:aws:s3:::example-bucket"
                },
                "object": object
            }
        }]
    })
}

pub fn s3_put_event() -> Value {
    s3_record(
        "ObjectCreated:Put",
        json!({
            "key": "test/key",
            "size": 1024,
            "eTag": "0123456789abcdef0123456789abcdef",
            "sequencer": "0A1B2C3D4E5F678901"
        }),
    )
}

pub fn s3_delete_event() -> Value {
    s3_record(
        "ObjectRemoved:Delete",
        json!({
            "key": "test/key",
            "sequencer": "0A1B2C3D4E5F678901"
        }),
    )
}

/// Gzipped, base64-encoded log batch as delivered by a subscription filter.
pub const EXAMPLE_AWSLOGS_DATA: &str = "H4sIAAAAAAAAAHWPwQqCQBCGX0Xm7EFtK+smZBEUgXoLCdMhFtKV3akI8d0bLYmibvPPN3wz00CJxmQnTO41whwWQRIctmEcB6sQbFC3CjW3XW8kxpOpP+OC22d1Wml1qZkQGtoMsScxaczKN3plG8zlaHIta5KqWsozoTYw3/djzwhpLwivWFGHGpAFe7DL68JlBUk+l7KSN7tCOEJ4M3/qOI49vMHj+zCKdlFqLaU2ZHV2a4Ct/an0/ivdX8oYc1UVX860fQDQiMdxRQEAAA==";

pub fn cloudwatch_logs_event() -> Value {
    json!({ "awslogs": { "data": EXAMPLE_AWSLOGS_DATA } })
}

pub fn sqs_example_event(queue_name: &str) -> Value {
    json!({
        "Records": [{
            "messageId": "059f36b4-87a3-44ab-83d2-661975830a7d",
            "receiptHandle": "AQEBwJnKyrHigUMZj6rYigCgxlaS3SLy0a",
            "body": "test",
            "attributes": {
                "ApproximateReceiveCount": "1",
                "SentTimestamp": "1545082649183",
                "SenderId": "AIDAIENQZJOLO23YVJ4VO",
                "ApproximateFirstReceiveTimestamp": "1545082649185"
            },
            "messageAttributes": {},
            "md5OfBody": "098f6bcd4621d373cade4e832627b4f6",
            "eventSource": "aws:sqs",
            "eventSourceARN": format!("arn:aws:sqs:{EXAMPLE_REGION}:{EXAMPLE_ACCOUNT}:{queue_name}"),
            "awsRegion": EXAMPLE_REGION
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_schedule_event_time_is_iso() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).single().expect("valid time");
        let event = schedule_event(now);
        assert_eq!(event["time"], "2024-03-01T10:00:00.000Z");
        assert_eq!(event["detail-type"], "Scheduled Event");
    }

    #[test]
    fn test_s3_event_names() {
        assert_eq!(s3_put_event()["Records"][0]["eventName"], "ObjectCreated:Put");
        assert_eq!(s3_delete_event()["Records"][0]["eventName"], "ObjectRemoved:Delete");
    }
}
