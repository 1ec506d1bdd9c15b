//! Flow engine behavior: streaming, errors, cancellation, concurrency.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axon::middleware::PassThrough;
use axon::{
    CancellationToken, Concurrency, Flow, FlowConfig, FlowError, Handler, handler_fn,
};

fn upper() -> impl Handler + 'static {
    handler_fn(|mut req, mut res| async move {
        let input = req.read_all().await?;
        res.write_all(&input.to_ascii_uppercase()).await?;
        Ok(())
    })
}

fn exclaim() -> impl Handler + 'static {
    handler_fn(|mut req, mut res| async move {
        let mut input = req.read_all().await?;
        input.push(b'!');
        res.write_all(&input).await?;
        Ok(())
    })
}

async fn run_to_string(flow: &Flow, input: &str) -> Result<String, FlowError> {
    let mut out = String::new();
    flow.run(&CancellationToken::new(), input, &mut out).await?;
    Ok(out)
}

#[tokio::test]
async fn single_handler_transforms() {
    let flow = Flow::new().then(upper());
    let out = run_to_string(&flow, "hello").await.unwrap();
    assert_eq!(out, "HELLO");
}

#[tokio::test]
async fn handlers_compose_in_order() {
    let flow = Flow::new().then(upper()).then(exclaim());
    let out = run_to_string(&flow, "hey").await.unwrap();
    assert_eq!(out, "HEY!");
}

#[tokio::test]
async fn terminal_bytes_equal_last_handler_output() {
    // a pass-through tail must not alter what the transform produced
    let flow = Flow::new().then(upper()).then(PassThrough::new());
    let out = run_to_string(&flow, "identity tail").await.unwrap();
    assert_eq!(out, "IDENTITY TAIL");
}

#[tokio::test]
async fn empty_flow_copies_input_through() {
    let flow = Flow::new();
    let out = run_to_string(&flow, "unchanged").await.unwrap();
    assert_eq!(out, "unchanged");
}

#[tokio::test]
async fn large_payload_streams_through_bounded_pipes() {
    // far larger than one pipe capacity: only works if stages run
    // concurrently and backpressure moves data along
    let payload = "x".repeat(1024 * 1024);
    let flow = Flow::new()
        .then(PassThrough::new())
        .then(PassThrough::new())
        .then(PassThrough::new());
    let out = run_to_string(&flow, &payload).await.unwrap();
    assert_eq!(out.len(), payload.len());
}

#[tokio::test]
async fn first_error_is_returned() {
    let boom = handler_fn(|mut req, _res| async move {
        let _ = req.read_all().await?;
        Err(FlowError::handler("boom"))
    });
    let flow = Flow::new().then(upper()).then(boom);

    let err = run_to_string(&flow, "x").await.unwrap_err();
    assert!(err.to_string().contains("boom"));
}

#[tokio::test]
async fn error_cancels_sibling_handlers() {
    let observed_cancel = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&observed_cancel);

    // the tail fails immediately; the head waits for the shared context
    let head = handler_fn(move |req, _res| {
        let observed = Arc::clone(&observed);
        async move {
            req.context().cancelled().await;
            observed.fetch_add(1, Ordering::SeqCst);
            Err(FlowError::Cancelled)
        }
    });
    let tail = handler_fn(|_req, _res| async move { Err(FlowError::handler("fail fast")) });
    let flow = Flow::new().then(head).then(tail);

    let err = run_to_string(&flow, "x").await.unwrap_err();
    assert!(err.to_string().contains("fail fast"));
    assert_eq!(observed_cancel.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pre_cancelled_context_aborts_run() {
    let ctx = CancellationToken::new();
    ctx.cancel();

    let flow = Flow::new().then(PassThrough::new());
    let mut out = String::new();
    let err = flow.run(&ctx, "x", &mut out).await.unwrap_err();
    assert!(matches!(err, FlowError::Cancelled));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrency_limit_bounds_in_flight_handlers() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut flow = Flow::with_config(FlowConfig {
        max_concurrent: Concurrency::Limit(2),
        timeout: None,
    });
    for _ in 0..6 {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        flow = flow.then(handler_fn(move |mut req, mut res| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                let input = req.read_all().await?;
                res.write_all(&input).await?;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        }));
    }

    let out = run_to_string(&flow, "gate me").await.unwrap();
    assert_eq!(out, "gate me");
    assert!(peak.load(Ordering::SeqCst) <= 2, "peak = {}", peak.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn flow_deadline_fails_slow_runs() {
    let slow = handler_fn(|mut req, mut res| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let input = req.read_all().await?;
        res.write_all(&input).await?;
        Ok(())
    });
    let flow = Flow::with_config(FlowConfig {
        max_concurrent: Concurrency::Auto,
        timeout: Some(Duration::from_millis(50)),
    })
    .then(slow);

    let err = run_to_string(&flow, "x").await.unwrap_err();
    assert!(matches!(err, FlowError::DeadlineExceeded(_)));
    assert!(err.to_string().contains("deadline exceeded"));
}

#[tokio::test]
async fn attachments_flow_downstream_with_the_data() {
    struct Marker(&'static str);

    // the head attaches before writing; the tail reads its input (which
    // orders it after the head) and then looks the marker up
    let head = handler_fn(|mut req, mut res| async move {
        req.attachments().insert(Marker("set by head"));
        let input = req.read_all().await?;
        res.write_all(&input).await?;
        Ok(())
    });
    let tail = handler_fn(|mut req, mut res| async move {
        let input = req.read_all().await?;
        let marker = req
            .attachments()
            .get::<Marker>()
            .ok_or_else(|| FlowError::handler("marker missing"))?;
        res.write_all(marker.0.as_bytes()).await?;
        let _ = input;
        Ok(())
    });
    let flow = Flow::new().then(head).then(tail);

    let out = run_to_string(&flow, "payload").await.unwrap();
    assert_eq!(out, "set by head");
}
