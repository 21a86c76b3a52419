pub mod noise_model;
