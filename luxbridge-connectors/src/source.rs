//! Raw light value producers

use async_trait::async_trait;
use luxbridge_core::SensorReadError;

/// Anything that yields raw light values, one per call
#[async_trait]
pub trait LightSource: Send {
    /// Take one reading
    async fn read_raw(&mut self) -> Result<f32, SensorReadError>;

    /// Human readable identity for logs
    fn describe(&self) -> String {
        "light source".into()
    }
}

#[async_trait]
impl<S: LightSource + ?Sized> LightSource for Box<S> {
    async fn read_raw(&mut self) -> Result<f32, SensorReadError> {
        (**self).read_raw().await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
