const OPEN: &str = "<think>";
const CLOSE: &str = "</think>";

/// Removes `<think>…</think>` spans from a stream of text deltas.
///
/// Markers may arrive split across deltas, so a trailing fragment that could
/// be the start of a marker is held back until the next delta decides it.
/// A close marker with no matching open drops everything before it, which
/// covers models that start thinking without emitting the open tag. Only text
/// still held in the current `push` is dropped; output already returned from
/// earlier deltas is not retracted.
#[derive(Debug, Default)]
pub struct ReasoningFilter {
    inside: bool,
    pending: String,
}

impl ReasoningFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_thinking(&self) -> bool {
        self.inside
    }

    /// Feed one delta and get back the visible part (possibly empty).
    pub fn push(&mut self, delta: &str) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.push_str(delta);

        let mut visible = String::new();
        let mut rest = buf.as_str();

        loop {
            if self.inside {
                match rest.find(CLOSE) {
                    Some(idx) => {
                        self.inside = false;
                        rest = &rest[idx + CLOSE.len()..];
                    }
                    None => {
                        self.pending = marker_prefix_suffix(rest, CLOSE).to_string();
                        return visible;
                    }
                }
            } else {
                let open = rest.find(OPEN);
                let close = rest.find(CLOSE);
                match (open, close) {
                    (Some(o), c) if c.map_or(true, |c| o < c) => {
                        visible.push_str(&rest[..o]);
                        self.inside = true;
                        rest = &rest[o + OPEN.len()..];
                    }
                    (_, Some(c)) => {
                        // stray close: what came before was reasoning
                        visible.clear();
                        rest = &rest[c + CLOSE.len()..];
                    }
                    _ => {
                        let held = marker_prefix_suffix_any(rest);
                        visible.push_str(&rest[..rest.len() - held.len()]);
                        self.pending = held.to_string();
                        return visible;
                    }
                }
            }
        }
    }

    /// End of stream. Returns held-back text that turned out not to be a
    /// marker. Anything still inside an open span is dropped.
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        if self.inside {
            String::new()
        } else {
            pending
        }
    }
}

/// Longest suffix of `text` that is a proper prefix of `marker`.
fn marker_prefix_suffix<'a>(text: &'a str, marker: &str) -> &'a str {
    for len in (1..marker.len()).rev() {
        if text.len() >= len && text.is_char_boundary(text.len() - len) {
            let tail = &text[text.len() - len..];
            if marker.starts_with(tail) {
                return tail;
            }
        }
    }
    ""
}

fn marker_prefix_suffix_any(text: &str) -> &str {
    let a = marker_prefix_suffix(text, OPEN);
    let b = marker_prefix_suffix(text, CLOSE);
    if a.len() >= b.len() {
        a
    } else {
        b
    }
}
