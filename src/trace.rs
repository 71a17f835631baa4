pub mod capture_reader;
#[cfg(test)]
pub mod capture_writer;
pub mod section;
