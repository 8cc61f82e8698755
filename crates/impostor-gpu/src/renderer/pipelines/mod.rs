pub mod impostor;
