//! Integration tests for the retrying outbound decorator.

use std::sync::Arc;
use std::time::Duration;

use execution_bridge::domain::ports::{
    OutboundClient, OutboundError, ReceivedResponse, RequestSpec, Verb,
};
use execution_bridge::domain::{Error, ErrorKind, RetryPolicy};
use execution_bridge::outbound::http::{RetryingClient, connection_reset_policy};
use execution_bridge::test_support::{RecordingSleeper, Scripted, ScriptedClient};
use rstest::{fixture, rstest};
use ::url::Url;

const DELAY: Duration = Duration::from_millis(25);

#[fixture]
fn url() -> Url {
    Url::parse("http://inventory.internal/items/7").expect("valid url")
}

#[fixture]
fn sleeper() -> RecordingSleeper {
    RecordingSleeper::default()
}

fn reset() -> OutboundError {
    OutboundError::connection_reset("connection closed before message completed")
}

fn decorate(
    inner: ScriptedClient,
    sleeper: &RecordingSleeper,
    attempts: u32,
) -> RetryingClient<ScriptedClient> {
    RetryingClient::new(inner)
        .with_policy(
            connection_reset_policy()
                .with_max_attempts(attempts)
                .with_delay(DELAY),
        )
        .with_sleeper(Arc::new(sleeper.clone()))
}

fn spec() -> RequestSpec {
    RequestSpec::new()
        .with_header("x-request-id", "abc")
        .with_body("payload")
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(10)]
#[tokio::test]
async fn persistent_resets_exhaust_the_attempt_bound(
    #[case] attempts: u32,
    url: Url,
    sleeper: RecordingSleeper,
) {
    let client = decorate(ScriptedClient::always(reset()), &sleeper, attempts);

    let err = client
        .fetch(&url, RequestSpec::new())
        .await
        .expect_err("resets persist");

    assert!(err.is_connection_reset());
    assert_eq!(client.inner().calls(), attempts as usize);
    assert_eq!(
        sleeper.sleeps(),
        vec![DELAY; attempts.saturating_sub(1) as usize]
    );
}

#[rstest]
#[tokio::test]
async fn a_late_success_is_returned_unchanged(url: Url, sleeper: RecordingSleeper) {
    let script: Vec<Scripted> = vec![Err(reset()), Err(reset()), Ok(201)];
    let client = decorate(ScriptedClient::new(script), &sleeper, 5);
    let plain = ScriptedClient::new([Ok(201)]);

    let retried = client.create(&url, spec()).await.expect("third attempt");
    let direct = plain.create(&url, spec()).await.expect("first attempt");

    assert_eq!(retried, direct);
    assert_eq!(client.inner().calls(), 3);
    assert_eq!(sleeper.sleeps(), vec![DELAY; 2]);
}

#[rstest]
#[case::timeout(OutboundError::timeout("read timed out"))]
#[case::connect(OutboundError::connect("connection refused"))]
#[case::status(OutboundError::status(503_u16, "busy"))]
#[case::decode(OutboundError::decode("truncated json"))]
#[tokio::test]
async fn other_failures_are_not_retried(
    #[case] failure: OutboundError,
    url: Url,
    sleeper: RecordingSleeper,
) {
    let client = decorate(ScriptedClient::always(failure.clone()), &sleeper, 10);

    let err = client
        .update(&url, RequestSpec::new())
        .await
        .expect_err("failure surfaces");

    assert_eq!(err, failure);
    assert_eq!(client.inner().calls(), 1);
    assert!(sleeper.sleeps().is_empty());
}

#[rstest]
#[case::fetch(Verb::Get)]
#[case::create(Verb::Post)]
#[case::update(Verb::Put)]
#[case::patch(Verb::Patch)]
#[case::delete(Verb::Delete)]
#[tokio::test]
async fn every_verb_is_retried(#[case] verb: Verb, url: Url, sleeper: RecordingSleeper) {
    let client = decorate(ScriptedClient::new([Err(reset())]), &sleeper, 3);

    let response = match verb {
        Verb::Get => client.fetch(&url, spec()).await,
        Verb::Post => client.create(&url, spec()).await,
        Verb::Put => client.update(&url, spec()).await,
        other => client.request(other, &url, spec()).await,
    }
    .expect("second attempt succeeds");

    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"payload");
    assert_eq!(client.inner().verbs(), vec![verb, verb]);
}

#[rstest]
#[tokio::test]
async fn streams_retry_until_the_response_is_established(url: Url, sleeper: RecordingSleeper) {
    let client = decorate(ScriptedClient::new([Err(reset()), Err(reset())]), &sleeper, 3);

    let response = client
        .stream(Verb::Get, &url, spec())
        .await
        .expect("third attempt streams");

    assert_eq!(response.status, 200);
    assert_eq!(response.collect().await.expect("body drains"), b"payload");
    assert_eq!(client.inner().calls(), 3);
}

#[rstest]
#[tokio::test]
async fn each_attempt_sends_the_original_request(url: Url, sleeper: RecordingSleeper) {
    let client = decorate(ScriptedClient::new([Err(reset())]), &sleeper, 2);

    let ReceivedResponse { headers, body, .. } =
        client.create(&url, spec()).await.expect("retry succeeds");

    assert_eq!(headers, spec().headers);
    assert_eq!(body, b"payload");
}

#[rstest]
#[tokio::test]
async fn exhausted_resets_classify_as_upstream_unavailable(url: Url, sleeper: RecordingSleeper) {
    let client = decorate(ScriptedClient::always(reset()), &sleeper, 2);

    let err = Error::from(
        client
            .fetch(&url, RequestSpec::new())
            .await
            .expect_err("resets persist"),
    );

    assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
}

#[rstest]
#[tokio::test]
async fn a_custom_predicate_widens_what_is_retried(url: Url, sleeper: RecordingSleeper) {
    let policy = RetryPolicy::new(|err: &OutboundError| {
        err.is_connection_reset() || matches!(err, OutboundError::Status { status: 503, .. })
    })
    .with_max_attempts(4)
    .with_delay(DELAY);
    let script: Vec<Scripted> = vec![
        Err(OutboundError::status(503_u16, "")),
        Err(reset()),
    ];
    let client = RetryingClient::new(ScriptedClient::new(script))
        .with_policy(policy)
        .with_sleeper(Arc::new(sleeper.clone()));

    let response = client
        .fetch(&url, RequestSpec::new())
        .await
        .expect("third attempt succeeds");

    assert_eq!(response.status, 200);
    assert_eq!(client.inner().calls(), 3);
    assert_eq!(sleeper.sleeps().len(), 2);
}
