use crate::codec::format_date;
use crate::object::Object;
use crate::ui::{pointer_fields, theme, Icons};
use owo_colors::OwoColorize;

pub fn header(text: &str) {
    println!("{} {}", Icons::DATABASE, text.style(theme().header.clone()));
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(theme().success.clone()));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, label.style(theme().error.clone()));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, label.style(theme().warn.clone()));
}

pub fn info(label: &str, value: &str) {
    println!(
        "{} {}: {}",
        Icons::INFO.style(theme().dim.clone()),
        label.style(theme().dim.clone()),
        value
    );
}

pub fn section(title: &str) {
    println!();
    println!("━{}━", title.style(theme().header.clone()));
}

pub fn muted(text: &str) -> String {
    text.style(theme().muted.clone()).to_string()
}

/// One-line summary of an object: key and timestamps
pub fn object_header(object: &Object) {
    let updated = object
        .updated_at()
        .map(|d| format_date(&d))
        .unwrap_or_else(|| "never saved".to_string());

    println!(
        "{} {} {}",
        Icons::OBJECT,
        object.key().to_string().style(theme().key.clone()),
        muted(&format!("(updated {})", updated))
    );
}

/// List the objects `object` points to, one line per pointer
pub fn references(object: &Object) {
    let pointers = pointer_fields(object);
    if pointers.is_empty() {
        return;
    }

    section("References");
    for (field, key) in pointers {
        println!("  {} -> {}", field, key.to_string().style(theme().pointer.clone()));
    }
}
