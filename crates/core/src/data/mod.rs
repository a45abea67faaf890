mod io;

pub use io::{read_matrix_csv, write_matrix_csv};
