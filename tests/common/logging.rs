use log::LevelFilter;

#[allow(unused)] // used in tests
pub fn init_default_logging() {
    enpalib::util::log_util::init(LevelFilter::Debug);
}
