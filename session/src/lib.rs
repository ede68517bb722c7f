//! Session state for one run of the Whiro instrumenter: the usage-mode
//! options chosen by the user, the statistics the pass gathers, and the
//! file-naming conventions shared between the compile-time engine and the
//! injected runtime.

mod flags;
mod options;
mod statistics;

pub use self::{options::Options, statistics::Statistics};

/// Everything the instrumentation driver needs to know about the current
/// run, threaded through the pass by mutable reference.
#[derive(Debug, Default)]
pub struct Session {
    pub options: Options,
    pub statistics: Statistics,
}

impl Session {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            statistics: Statistics::default(),
        }
    }
}

/// The path of the snapshot output file for a program compiled from
/// `source_file`, opened for overwrite when the instrumented program starts.
pub fn output_file_name(source_file: &str) -> String {
    format!("{source_file}_Output")
}

/// The path of the Type Table file for a program compiled from
/// `source_file`: the source name with its extension replaced.
pub fn type_table_file_name(source_file: &str) -> String {
    let stem = match source_file.rfind('.') {
        Some(index) => &source_file[..index],
        None => source_file,
    };
    format!("{stem}_TypeTable.bin")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_naming_conventions() {
        assert_eq!(output_file_name("list.c"), "list.c_Output");
        assert_eq!(type_table_file_name("list.c"), "list_TypeTable.bin");
        assert_eq!(type_table_file_name("noext"), "noext_TypeTable.bin");
    }
}
