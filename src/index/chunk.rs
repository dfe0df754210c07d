/// Line-window chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub lines: usize,
    pub overlap: usize,
    pub max_chars: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            lines: 60,
            overlap: 10,
            max_chars: 1_500,
        }
    }
}

/// Split source text into overlapping windows of `lines` lines.
///
/// Consecutive windows share `overlap` lines. A window longer than `max_chars`
/// is split further, at the last newline before the limit when there is one.
/// Blank input yields no chunks.
pub fn chunk_code(text: &str, opts: ChunkOptions) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = text.lines().collect();
    let window = opts.lines.max(1);
    let step = window.saturating_sub(opts.overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + window).min(lines.len());
        let joined = lines[start..end].join("\n");
        if !joined.trim().is_empty() {
            split_oversized(&joined, opts.max_chars.max(1), &mut chunks);
        }
        if end == lines.len() {
            break;
        }
        start += step;
    }

    chunks
}

fn split_oversized(text: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = text;
    while remaining.len() > max_chars {
        let limit = snap_to_char_boundary(remaining, max_chars);
        let cut = match remaining[..limit].rfind('\n') {
            Some(pos) if pos > 0 => pos + 1,
            _ => limit,
        };
        // A multi-byte char wider than max_chars must still make progress.
        let cut = if cut == 0 {
            remaining.chars().next().map(char::len_utf8).unwrap_or(remaining.len())
        } else {
            cut
        };
        out.push(remaining[..cut].trim_end().to_string());
        remaining = &remaining[cut..];
    }
    if !remaining.trim().is_empty() {
        out.push(remaining.to_string());
    }
}

fn snap_to_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> String {
        (1..=n).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn test_blank_text_has_no_chunks() {
        assert!(chunk_code("", ChunkOptions::default()).is_empty());
        assert!(chunk_code("\n  \n", ChunkOptions::default()).is_empty());
    }

    #[test]
    fn test_short_file_is_one_chunk() {
        let chunks = chunk_code("def main():\n    pass\n", ChunkOptions::default());
        assert_eq!(chunks, vec!["def main():\n    pass".to_string()]);
    }

    #[test]
    fn test_windows_overlap() {
        let opts = ChunkOptions {
            lines: 4,
            overlap: 1,
            max_chars: 10_000,
        };
        let chunks = chunk_code(&numbered(10), opts);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].starts_with("line 1\n"));
        assert!(chunks[0].ends_with("line 4"));
        assert!(chunks[1].starts_with("line 4\n"));
        assert!(chunks[2].starts_with("line 7\n"));
        assert!(chunks[2].ends_with("line 10"));
    }

    #[test]
    fn test_oversized_window_is_split() {
        let long_line = "x".repeat(50);
        let text = vec![long_line.as_str(); 6].join("\n");
        let opts = ChunkOptions {
            lines: 60,
            overlap: 10,
            max_chars: 120,
        };
        let chunks = chunk_code(&text, opts);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 120));
        let total_x: usize = chunks.iter().map(|c| c.matches('x').count()).sum();
        assert_eq!(total_x, 300);
    }

    #[test]
    fn test_multibyte_hard_split() {
        let text = "é".repeat(100);
        let opts = ChunkOptions {
            lines: 60,
            overlap: 0,
            max_chars: 15,
        };
        let chunks = chunk_code(&text, opts);
        assert!(chunks.iter().all(|c| c.len() <= 15));
        assert_eq!(chunks.concat(), text);
    }
}
