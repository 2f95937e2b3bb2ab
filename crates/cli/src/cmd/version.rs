pub fn cmd_version() {
  println!("kiln {}", env!("CARGO_PKG_VERSION"));
}
