/// Where the per-voxel preprocessing runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Processor {
    /// Host side, using ndarray and rayon.
    Cpu,
    #[default]
    Gpu,
}

/// Key used to order slices along the stacking axis. Slices are sorted
/// ascending by the key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    SliceLocation,
    InstanceNumber,
    None,
}
