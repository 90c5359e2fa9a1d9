
mod test_cleanup_loop;
mod test_common_validation;
mod test_sliding_window_counter;
