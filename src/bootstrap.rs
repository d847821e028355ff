//! Optional sample files for a fresh server root.

use crate::error::StoreError;
use crate::store::FileStore;

pub const SAMPLE_FILES: [(&str, &str); 3] = [
    ("hello.txt", "Hello, World! This is a sample text file."),
    ("data.json", r#"{"name": "John", "age": 30, "city": "New York"}"#),
    (
        "info.md",
        "# File Transfer Server\n\nThis is a markdown file for testing.",
    ),
];

/// Write each sample that does not already exist. Returns the names created.
pub fn seed_samples(store: &FileStore) -> Result<Vec<&'static str>, StoreError> {
    let mut created = Vec::new();
    for (name, content) in SAMPLE_FILES {
        match store.stat(name) {
            Ok(_) => continue,
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        store.write(name, content.as_bytes())?;
        created.push(name);
    }
    Ok(created)
}
