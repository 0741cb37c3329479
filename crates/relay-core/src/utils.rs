use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

static FILE_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Truncate to `max_len` characters, marking the cut with `...`.
pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

/// Replace anything outside `[A-Za-z0-9._-]` so the name is safe on disk.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let mut out = String::with_capacity(base.len());
    for ch in base.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    let out = out.trim_start_matches('.').to_string();
    if out.is_empty() {
        "attachment".to_string()
    } else {
        out
    }
}

/// Sanitized filename made unique per process with a timestamp and counter.
pub fn unique_filename(name: &str) -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let n = FILE_COUNTER.fetch_add(1, Ordering::SeqCst);

    let base = sanitize_filename(name);
    if let Some((stem, ext)) = base.rsplit_once('.') {
        if !stem.is_empty() && !ext.is_empty() {
            return format!("{stem}_{ts}_{n}.{ext}");
        }
    }
    format!("{base}_{ts}_{n}")
}
