pub mod presence_sweeper;
