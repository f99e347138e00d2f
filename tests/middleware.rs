use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use http::{HeaderValue, Method, StatusCode, Uri, header};
use stackwrap::middleware::{Buffer, EscapeHtml, Peek};
use stackwrap::{BoxedHandler, Handler, Recorder, Request, ResponseWriter, Stack, handler_fn, next_handler_fn};

fn serve(h: &BoxedHandler) -> Recorder {
    let mut rec = Recorder::new();
    h.serve(&mut rec, &Request::new(Method::GET, Uri::from_static("/")));
    rec
}

/// Fails with a 503 on the first call, succeeds afterwards.
fn flaky() -> impl Fn(&mut dyn ResponseWriter, &Request) + Send + Sync + 'static {
    let calls = AtomicUsize::new(0);
    move |w: &mut dyn ResponseWriter, _: &Request| {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            w.headers().insert("x-attempt", HeaderValue::from_static("first"));
            w.write_header(StatusCode::SERVICE_UNAVAILABLE);
            // Refused by Peek below, so the error is ignored.
            let _ = w.write_all(b"try again");
            return;
        }
        w.write_all(b"ok").unwrap();
    }
}

#[test]
fn buffer_retries_a_failed_handler() {
    let retry = next_handler_fn(|next: &dyn Handler, w: &mut dyn ResponseWriter, req: &Request| {
        let mut buf = Buffer::new(w);
        next.serve(&mut buf, req);
        if !buf.is_ok() {
            buf.reset();
            next.serve(&mut buf, req);
        }
        buf.flush_all().unwrap();
    });
    let h = Stack::new().with(retry).with(handler_fn(flaky())).build();

    let rec = serve(&h);
    assert_eq!(rec.code(), Some(StatusCode::OK));
    assert_eq!(rec.header("x-attempt"), None);
    assert_eq!(rec.body_text(), "ok");
}

#[test]
fn buffer_rewrites_the_body() {
    let upper = next_handler_fn(|next: &dyn Handler, w: &mut dyn ResponseWriter, req: &Request| {
        let mut buf = Buffer::new(w);
        next.serve(&mut buf, req);
        let body = buf.body_text().to_uppercase();
        buf.flush_headers();
        buf.flush_code();
        buf.inner().write_all(body.as_bytes()).unwrap();
    });
    let h = Stack::new()
        .with(upper)
        .with(handler_fn(|w: &mut dyn ResponseWriter, _: &Request| {
            w.write_header(StatusCode::ACCEPTED);
            w.write_all(b"quiet").unwrap();
        }))
        .build();

    let rec = serve(&h);
    assert_eq!(rec.code(), Some(StatusCode::ACCEPTED));
    assert_eq!(rec.body_text(), "QUIET");
}

#[test]
fn peek_replaces_error_bodies_only() {
    let pretty_errors = next_handler_fn(|next: &dyn Handler, w: &mut dyn ResponseWriter, req: &Request| {
        let replaced = Cell::new(false);
        let mut peek = Peek::new(w, |p| {
            if p.is_ok() {
                p.flush_missing();
                return true;
            }
            let status = p.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let out = p.inner();
            out.headers().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            out.write_header(status);
            out.write_all(format!("error {}", status.as_u16()).as_bytes()).unwrap();
            replaced.set(true);
            false
        });
        next.serve(&mut peek, req);
        if !replaced.get() {
            peek.flush_missing();
        }
    });

    let h = Stack::new()
        .with(pretty_errors)
        .with(handler_fn(flaky()))
        .build();

    let rec = serve(&h);
    assert_eq!(rec.code(), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(rec.header("content-type"), Some("text/plain"));
    assert_eq!(rec.header("x-attempt"), None);
    assert_eq!(rec.body_text(), "error 503");

    let rec = serve(&h);
    assert_eq!(rec.code(), Some(StatusCode::OK));
    assert_eq!(rec.body_text(), "ok");
}

#[test]
fn peek_flushes_status_of_empty_responses() {
    let h = Stack::new()
        .with(next_handler_fn(|next: &dyn Handler, w: &mut dyn ResponseWriter, req: &Request| {
            let mut peek = Peek::new(w, |_| true);
            next.serve(&mut peek, req);
            peek.flush_missing();
        }))
        .with(handler_fn(|w: &mut dyn ResponseWriter, _: &Request| {
            w.headers().insert(header::LOCATION, HeaderValue::from_static("/elsewhere"));
            w.write_header(StatusCode::SEE_OTHER);
        }))
        .build();

    let rec = serve(&h);
    assert_eq!(rec.code(), Some(StatusCode::SEE_OTHER));
    assert_eq!(rec.header("location"), Some("/elsewhere"));
}

#[test]
fn escape_html_as_middleware() {
    let h = Stack::new()
        .with(next_handler_fn(|next: &dyn Handler, w: &mut dyn ResponseWriter, req: &Request| {
            next.serve(&mut EscapeHtml::new(w), req);
        }))
        .with(handler_fn(|w: &mut dyn ResponseWriter, _: &Request| {
            w.write_all(b"<a href=\"x\">Tom & Jerry's</a>").unwrap();
        }))
        .build();

    assert_eq!(
        serve(&h).body_text(),
        "&lt;a href=&#34;x&#34;&gt;Tom &amp; Jerry&#39;s&lt;/a&gt;"
    );
}

#[test]
fn handlers_see_shared_handler_state() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&hits);
    let h = Stack::new()
        .with(handler_fn(move |w: &mut dyn ResponseWriter, _: &Request| {
            let n = counted.fetch_add(1, Ordering::SeqCst) + 1;
            w.write_all(n.to_string().as_bytes()).unwrap();
        }))
        .build();

    assert_eq!(serve(&h).body_text(), "1");
    assert_eq!(serve(&h).body_text(), "2");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
