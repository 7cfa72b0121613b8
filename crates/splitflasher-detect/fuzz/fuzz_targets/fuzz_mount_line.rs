//! Fuzz test for Linux mount line parsing
//!
//! Tests that mount line parsing and octal unescaping handle arbitrary
//! input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    for line in data.lines() {
        if let Some((device, mount_point, filesystem)) = fuzz_parse_mount_line(line) {
            assert!(!filesystem.is_empty());
            let _ = device.len();
            let _ = mount_point.len();
        }

        // Unescaping never grows the input
        let decoded = fuzz_unescape(line);
        assert!(decoded.len() <= line.len());
    }
});

/// Parse a single line from /proc/mounts
fn fuzz_parse_mount_line(line: &str) -> Option<(String, String, String)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() >= 3 {
        Some((
            fuzz_unescape(parts[0]),
            fuzz_unescape(parts[1]),
            parts[2].to_string(),
        ))
    } else {
        None
    }
}

/// Decode `\NNN` octal escapes
fn fuzz_unescape(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            output.push(ch);
            continue;
        }

        let mut oct = String::new();
        while oct.len() < 3 {
            match chars.peek() {
                Some(next) if next.is_digit(8) => {
                    oct.push(*next);
                    chars.next();
                }
                _ => break,
            }
        }

        match u8::from_str_radix(&oct, 8) {
            Ok(value) if oct.len() == 3 && value.is_ascii() => output.push(value as char),
            _ => {
                output.push('\\');
                output.push_str(&oct);
            }
        }
    }

    output
}
