use core::pin::Pin;

use futures::stream::Stream;

pub type BoxStream<'a, T> = Pin<alloc::boxed::Box<dyn Stream<Item = T> + Send + 'a>>;
