use colored::Colorize;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_failure(msg: &str) {
    println!("{} {}", "✗".red(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Printable form of a stored value: UTF-8 as is, anything else as a byte
/// count plus a hex preview.
pub fn describe_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let preview: String = bytes.iter().take(32).map(|b| format!("{b:02x}")).collect();
            let ellipsis = if bytes.len() > 32 { "…" } else { "" };
            format!("<{} bytes> {preview}{ellipsis}", bytes.len())
        }
    }
}
