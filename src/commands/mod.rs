pub mod parse;

#[cfg(test)]
mod tests;
