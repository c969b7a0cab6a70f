mod helpers;
mod queue;
mod signals;
