use crate::codec::format_date;
use crate::object::{Object, ObjectKey, ObjectRef, Value};
use crate::storage::DbStats;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled)]
struct ClassRow {
    #[tabled(rename = "Class")]
    class_name: String,
    #[tabled(rename = "Rows")]
    rows: usize,
}

#[derive(Tabled)]
struct ObjectRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Updated")]
    updated: String,
    #[tabled(rename = "Fields")]
    fields: usize,
}

/// Render a field value for display; pointers show the target key
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Json(json) => json.to_string(),
        Value::Date(date) => format_date(date),
        Value::Pointer(object) => format!("-> {}", object.key()),
        Value::List(items) => {
            let items: Vec<_> = items.iter().map(render_value).collect();
            format!("[{}]", items.join(", "))
        }
    }
}

/// Every pointer held by `object`, with the field holding it, in field order
pub fn pointer_fields(object: &Object) -> Vec<(String, ObjectKey)> {
    fn collect(field: &str, value: &Value, out: &mut Vec<(String, ObjectKey)>) {
        match value {
            Value::Pointer(target) => out.push((field.to_string(), target.key())),
            Value::List(items) => items.iter().for_each(|item| collect(field, item, out)),
            Value::Json(_) | Value::Date(_) => {}
        }
    }

    let mut pointers = Vec::new();
    for (field, value) in object.fields() {
        collect(&field, &value, &mut pointers);
    }
    pointers
}

pub fn fields_table(object: &Object) -> String {
    let rows: Vec<_> = object
        .fields()
        .iter()
        .map(|(field, value)| FieldRow {
            field: field.clone(),
            value: render_value(value),
        })
        .collect();

    if rows.is_empty() {
        return String::new();
    }
    Table::new(&rows).with(Style::rounded()).to_string()
}

pub fn objects_table(objects: &[ObjectRef]) -> String {
    let rows: Vec<_> = objects
        .iter()
        .map(|object| ObjectRow {
            key: object.key().to_string(),
            updated: object.updated_at().map(|d| format_date(&d)).unwrap_or_default(),
            fields: object.keys().len(),
        })
        .collect();

    if rows.is_empty() {
        return String::new();
    }
    Table::new(&rows).with(Style::rounded()).to_string()
}

pub fn stats_table(stats: &DbStats) -> String {
    let rows: Vec<_> = stats
        .classes
        .iter()
        .map(|(class_name, rows)| ClassRow {
            class_name: class_name.clone(),
            rows: *rows,
        })
        .collect();

    Table::new(&rows).with(Style::rounded()).to_string()
}
