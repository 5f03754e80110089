pub(crate) mod samples;
pub(crate) mod spline;
