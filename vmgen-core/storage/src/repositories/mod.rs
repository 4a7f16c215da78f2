mod runs;

pub use runs::RunRepository;
