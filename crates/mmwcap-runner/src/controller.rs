use crate::error::Result;

/// Arms and disarms the hardware behind one capture lane.
///
/// `arm` runs before the lane's worker starts; `disarm` runs after the
/// worker has been joined.
pub trait Controller: Send {
    /// Name for diagnostics.
    fn name(&self) -> &str;

    /// Start the hardware producing data.
    fn arm(&mut self) -> Result<()>;

    /// Stop the hardware producing data.
    fn disarm(&mut self) -> Result<()>;
}

impl<T: Controller + ?Sized> Controller for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn arm(&mut self) -> Result<()> {
        (**self).arm()
    }

    fn disarm(&mut self) -> Result<()> {
        (**self).disarm()
    }
}
