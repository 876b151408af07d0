pub mod fixtures;

#[cfg(test)]
mod catalog_tests;
#[cfg(test)]
mod download_tests;
#[cfg(test)]
mod transcription_tests;
#[cfg(test)]
mod ws_tests;
