use crossterm::style::Stylize;
use unicode_width::UnicodeWidthStr;

pub fn success(message: &str) {
    println!("{}", message.green());
}

pub fn failure(message: &str) {
    println!("{}\n", message.red());
}

/// Prints a message inside a rounded box, for the few moments the agent
/// speaks directly to the operator.
pub fn dialog(message: &str) {
    let lines: Vec<&str> = message.lines().collect();
    let inner = lines.iter().map(|line| line.width()).max().unwrap_or(0) + 4;

    println!();
    println!("  ╭{}╮", "─".repeat(inner));
    println!("  │{}│", " ".repeat(inner));
    for line in &lines {
        println!("  │  {}{}  │", line, " ".repeat(inner - 4 - line.width()));
    }
    println!("  │{}│", " ".repeat(inner));
    println!("  ╰{}╯", "─".repeat(inner));
    println!();
}
