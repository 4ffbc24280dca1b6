//! Server-rendered inbox page.

use crate::feed::FeedView;
use crate::types::{parse_timestamp, WebhookRecord};
use chrono::Local;
use std::fmt::Write as _;

/// `YYYY/MM/DD HH:MM` in local time. Unparseable values pass through.
pub fn format_received_at(value: Option<&str>) -> String {
    match value {
        None => String::new(),
        Some(raw) => match parse_timestamp(raw) {
            Some(t) => t.with_timezone(&Local).format("%Y/%m/%d %H:%M").to_string(),
            None => raw.to_string(),
        },
    }
}

/// Escapes markup and line breaks, so rendered fragments are a single line.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
    out
}

fn list_item(out: &mut String, record: &WebhookRecord, active: bool) {
    let email = record.email();
    let class = if active { "email active" } else { "email" };
    let _ = write!(
        out,
        concat!(
            r#"<li><a class="{class}" href="/?id={id}" data-id="{id}">"#,
            r#"<span class="date">{date}</span><span class="subject">{subject}</span>"#,
            r#"<span class="from">From: {from}</span>"#,
        ),
        class = class,
        id = record.id,
        date = escape_html(&format_received_at(record.received_at.as_deref())),
        subject = escape_html(email.subject()),
        from = escape_html(email.sender()),
    );
    let to = email.recipients();
    if !to.is_empty() {
        let _ = write!(out, r#"<span class="to">To: {}</span>"#, escape_html(&to));
    }
    out.push_str("</a></li>");
}

fn detail(out: &mut String, record: &WebhookRecord) {
    let email = record.email();
    let _ = write!(
        out,
        r#"<header><p class="date">{date}</p><h2>{subject}</h2>"#,
        date = escape_html(&format_received_at(record.received_at.as_deref())),
        subject = escape_html(email.subject()),
    );
    if !email.sender().is_empty() {
        let _ = write!(out, "<p><strong>From:</strong> {}</p>", escape_html(email.sender()));
    }
    let to = email.recipients();
    if !to.is_empty() {
        let _ = write!(out, "<p><strong>To:</strong> {}</p>", escape_html(&to));
    }
    out.push_str("</header>");

    match email.body() {
        Some(html) => {
            let _ = write!(
                out,
                concat!(
                    r#"<iframe title="Email content {id}" sandbox="allow-same-origin" "#,
                    r#"srcdoc="{srcdoc}"></iframe>"#,
                ),
                id = record.id,
                srcdoc = escape_html(html),
            );
        }
        None => out.push_str(r#"<div class="empty">HTML body is empty.</div>"#),
    }
}

/// Keeps the page in sync with `/api/emails/stream`: every `page` event
/// replaces the inbox markup, and clicks on list entries are sent to the
/// stream's select endpoint instead of reloading.
const LIVE_SCRIPT: &str = r#"<script>
(function () {
  var inbox = document.getElementById('inbox');
  var session = null;
  var selected = inbox.dataset.selected;
  var source = new EventSource('/api/emails/stream' + (selected ? '?selected=' + selected : ''));
  source.addEventListener('session', function (e) { session = e.data; });
  source.addEventListener('page', function (e) {
    inbox.innerHTML = e.data;
    var active = inbox.querySelector('a.active');
    if (active) { history.replaceState(null, '', '/?id=' + active.dataset.id); }
  });
  inbox.addEventListener('click', function (e) {
    var link = e.target.closest('a[data-id]');
    if (!link || !session) { return; }
    e.preventDefault();
    fetch('/api/emails/stream/' + session + '/select', {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify({ id: Number(link.dataset.id) })
    }).then(function (r) { if (!r.ok) { window.location = link.href; } });
  });
})();
</script>"#;

/// Inbox list plus the selected email, without the surrounding document.
/// This is also the payload of the stream's `page` events.
pub fn render_inbox(view: &FeedView) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        r#"<aside><h1>Inbox</h1><span class="count">{}</span>"#,
        view.records.len()
    );
    if view.records.is_empty() {
        out.push_str(r#"<p class="empty">No stored emails.</p>"#);
    } else {
        out.push_str("<ul>");
        for record in view.records.records() {
            list_item(&mut out, record, Some(record.id) == view.selected);
        }
        out.push_str("</ul>");
    }
    out.push_str("</aside><section>");

    match view.selected_record() {
        Some(record) => detail(&mut out, record),
        None => out.push_str(r#"<div class="empty">No email selected.</div>"#),
    }

    out.push_str("</section>");
    out
}

/// Full document: the initial inbox and the live-update script.
pub fn render_page(view: &FeedView) -> String {
    let mut out = String::from(
        r#"<!DOCTYPE html><html><head><meta charset="utf-8"><title>Inbox</title></head><body>"#,
    );
    let selected = view.selected.map(|id| id.to_string()).unwrap_or_default();
    let _ = write!(
        out,
        r#"<main id="inbox" data-selected="{selected}">{}</main>"#,
        render_inbox(view)
    );
    out.push_str(LIVE_SCRIPT);
    out.push_str("</body></html>");
    out
}
