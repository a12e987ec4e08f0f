//! Getting a session out of the app: spreadsheet export and share links.

pub mod csv;
pub mod share;

pub use csv::{csv_file_name, export_csv, CSV_HEADER};
pub use share::{
    create_share_link, embedded_link, generate_short_id, parse_link, resolve_link, short_link,
    ShareLink,
};
