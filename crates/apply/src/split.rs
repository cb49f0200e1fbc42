/// Document separator: a `---` line, optionally followed by a comment.
fn is_separator(line: &str) -> bool {
    let line = line.trim_end();
    line == "---" || line.starts_with("--- ")
}

/// Split a multi-document manifest on `---` lines, preserving source order.
/// Whitespace-only segments are dropped.
pub fn split_manifests(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        if is_separator(line) {
            push_segment(&mut out, &text[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    push_segment(&mut out, &text[start..]);
    out
}

fn push_segment<'a>(out: &mut Vec<&'a str>, seg: &'a str) {
    if !seg.trim().is_empty() {
        out.push(seg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_separator_lines_and_drops_empty_segments() {
        let text = "---\na: 1\n---\n\n   \n---\nb: 2\n--- # trailing comment\nc: 3";
        let docs: Vec<&str> = split_manifests(text).into_iter().map(str::trim).collect();
        assert_eq!(docs, vec!["a: 1", "b: 2", "c: 3"]);
    }

    #[test]
    fn dashes_inside_a_line_do_not_split() {
        let text = "data:\n  banner: \"---\"\n  rule: a---b\n";
        assert_eq!(split_manifests(text).len(), 1);
    }

    #[test]
    fn rejoining_trimmed_segments_round_trips() {
        let text = "kind: A\n---\n\nkind: B\n\n---\n---\nkind: C\n";
        let first: Vec<&str> = split_manifests(text).into_iter().map(str::trim).collect();
        let joined = first.join("\n---\n");
        let second: Vec<&str> = split_manifests(&joined).into_iter().map(str::trim).collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["kind: A", "kind: B", "kind: C"]);
    }

    #[test]
    fn blank_input_yields_nothing() {
        assert!(split_manifests("").is_empty());
        assert!(split_manifests("\n---\n \n").is_empty());
    }
}
